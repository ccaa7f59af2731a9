//! Infrastructure layer: log storage, the instance repository and the
//! interaction service built on top of it.

pub mod async_facade;
pub mod config;
pub mod interaction;
pub mod locks;
pub mod log_store;
pub mod repository;
pub mod seeds;


pub use async_facade::AsyncSagaInstanceRepository;
pub use config::{InteractionConfig, SagaLogConfig};
pub use interaction::{
    InteractionError, InteractionOutcome, InteractionResult, SagaInteractionService,
};
pub use locks::KeyedLocks;
pub use log_store::{InMemoryTransactionLogStore, StoreError, StoreSnapshot, TransactionLogStore};
pub use repository::{RepositoryError, RepositoryResult, SagaInstanceRepository};
pub use seeds::{FixedSeedSource, SeedSource, ThreadRngSeedSource};
