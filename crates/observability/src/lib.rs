//! Tracing and logging setup shared by every packloop process.

pub mod subscriber;

pub use subscriber::{LogFormat, init, init_for_tests, init_with};
