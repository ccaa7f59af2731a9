//! Transaction and instance model for per-avatar saga logs.
//!
//! - `Transaction`: an immutable, sequenced domain event with a string payload bag
//! - `SagaEvent`: typed views over the payload, one per `TransactionKind`
//! - `SagaInstance`: the aggregate root owning an append-only `TransactionLog`
//! - `CommitFeed`: fan-out of committed batches to downstream readers

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod instance;
pub mod payload;
pub mod transaction;

pub use bus::{CommitFeed, CommittedBatch, FeedError, Subscription};
pub use event::{
    CharacterDefeated, CharacterSpawned, CurrencyChanged, DialogueNodeVisited, Heartbeat,
    ItemTraded, PlayerEntered, QuestCompleted, QuestObjectiveProgressed, QuestStarted,
    QuestTokenAwarded, SagaCompleted, SagaEvent, SagaFailed, TriggerActivated, TriggerCompleted,
};
pub use in_memory_bus::InMemoryCommitFeed;
pub use instance::{InstanceRecord, SagaInstance, TransactionLog};
pub use payload::Payload;
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
