//! Transaction log store boundary.
//!
//! Durable storage for instance headers and their transactions, with no
//! knowledge of saga rules. Concurrency policy lives in the repository above.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryTransactionLogStore, StoreSnapshot};
pub use r#trait::{StoreError, TransactionLogStore};
