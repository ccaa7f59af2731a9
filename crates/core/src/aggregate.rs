//! Aggregate root and event-fold traits for event-sourced models.

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For a saga instance this is the highest sequence number issued so far
    /// (0 for an empty log).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Deterministic state evolution from a sequence of events.
///
/// Implementations must not perform IO, read clocks or draw random numbers:
/// applying the same events in the same order always yields the same state.
pub trait EventFold<E> {
    /// Evolve in-memory state from a single event.
    fn apply(&mut self, event: &E);
}
