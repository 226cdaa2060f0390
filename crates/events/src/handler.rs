/// Decide and apply a command against an in-memory aggregate (no IO).
///
/// The infrastructure dispatcher does the same thing with persistence and
/// optimistic concurrency around it; this helper is for tests and for callers
/// that only need the resulting state.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: forgerev_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
