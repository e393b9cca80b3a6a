/// Execute an aggregate command in memory (no IO).
///
/// 1. **Decide**: `aggregate.handle(command)` (pure, no mutation)
/// 2. **Evolve**: applies each decided event via `aggregate.apply(event)`
///
/// Useful in unit tests. Production paths go through the infra
/// `CommandDispatcher`, which also persists and publishes.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: packloop_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
