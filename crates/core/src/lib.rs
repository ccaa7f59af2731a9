//! `sagalog-core`: domain foundation building blocks.
//!
//! Identifiers, errors, clock abstraction and the aggregate/fold traits shared by
//! the transaction model, the state machine and the repository. No IO lives here.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, EventFold, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{
    AvatarId, CharacterInstanceId, CharacterRef, DialogueNodeRef, InstanceId, ItemRef,
    LocationRef, ObjectiveRef, QuestRef, QuestTokenRef, SagaRef, TransactionId, TriggerRef,
};
