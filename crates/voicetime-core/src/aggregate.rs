//! Aggregate root abstraction.

use crate::event::DomainEvent;

/// Trait for aggregate roots that are persisted as a unit and collect the
/// domain events produced while mutating them.
pub trait AggregateRoot: Send + Sync {
    /// The identifier type of this aggregate.
    type Id: Copy + std::fmt::Display;

    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Self::Id;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Removes and returns the uncommitted events once they have been handed
    /// to the persistence step.
    fn take_uncommitted_events(&mut self) -> Vec<Self::Event>;
}
