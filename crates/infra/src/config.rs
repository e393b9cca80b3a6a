//! Runtime configuration, read from the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use packloop_packs::PackKeying;

pub const ENV_PACK_KEYING: &str = "PACKLOOP_PACK_KEYING";
pub const ENV_ORDER_CODE_MAX_ATTEMPTS: &str = "PACKLOOP_ORDER_CODE_MAX_ATTEMPTS";

const DEFAULT_ORDER_CODE_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unsupported value {value:?} (expected {expected})")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackloopConfig {
    pub pack_keying: PackKeying,
    /// How many order codes placement draws before giving up.
    pub order_code_max_attempts: u32,
}

impl Default for PackloopConfig {
    fn default() -> Self {
        Self {
            pack_keying: PackKeying::default(),
            order_code_max_attempts: DEFAULT_ORDER_CODE_MAX_ATTEMPTS,
        }
    }
}

impl PackloopConfig {
    /// Read `PACKLOOP_PACK_KEYING` and `PACKLOOP_ORDER_CODE_MAX_ATTEMPTS`.
    /// Unset variables fall back to defaults; unparseable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PACK_KEYING) {
            config.pack_keying = match raw.trim().to_ascii_lowercase().as_str() {
                "per_buyer_per_day" => PackKeying::PerBuyerPerDay,
                "per_buyer" => PackKeying::PerBuyer,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_PACK_KEYING,
                        value: raw,
                        expected: "per_buyer_per_day | per_buyer",
                    });
                }
            };
        }

        if let Some(raw) = lookup(ENV_ORDER_CODE_MAX_ATTEMPTS) {
            config.order_code_max_attempts = match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_ORDER_CODE_MAX_ATTEMPTS,
                        value: raw,
                        expected: "an integer >= 1",
                    });
                }
            };
        }

        Ok(config)
    }
}
