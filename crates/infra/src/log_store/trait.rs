use std::sync::Arc;

use thiserror::Error;

use sagalog_core::{AvatarId, InstanceId, SagaRef, TransactionId};
use sagalog_events::{InstanceRecord, Transaction};

/// Transaction log store operation error.
///
/// Storage-level failures only. Whether a commit batch is acceptable is decided
/// by the repository before anything reaches the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A write would break an ordering or uniqueness rule (e.g. a sequence
    /// already taken, a record rebound to another instance).
    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("transaction already stored: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("instance not stored: {0}")]
    UnknownInstance(InstanceId),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable keyed storage for instances and their transactions.
///
/// Two record collections:
/// - instances, keyed by `instance_id`, with a unique lookup by
///   `(owner_avatar_id, saga_ref)`;
/// - transactions, keyed by `transaction_id`, each carrying its `instance_id`
///   and `sequence`, queried by `(instance_id, sequence)`.
///
/// Implementations must:
/// - make `insert_instance_if_absent` atomic with respect to the owner lookup
///   (at most one record per pair, whatever the interleaving);
/// - apply `append_transactions` and `replace_transactions` all-or-nothing;
/// - refuse a second record for an `(instance_id, sequence)` position;
/// - return owned copies from every read, ordered by sequence where relevant.
pub trait TransactionLogStore: Send + Sync {
    /// Insert `record` unless one already exists for its owner + saga.
    ///
    /// Returns the stored record and whether this call created it.
    fn insert_instance_if_absent(
        &self,
        record: InstanceRecord,
    ) -> Result<(InstanceRecord, bool), StoreError>;

    fn get_instance(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>, StoreError>;

    fn find_instance(
        &self,
        owner: AvatarId,
        saga_ref: &SagaRef,
    ) -> Result<Option<InstanceRecord>, StoreError>;

    fn instances_for_owner(&self, owner: AvatarId) -> Result<Vec<InstanceRecord>, StoreError>;

    fn instance_count(&self) -> Result<usize, StoreError>;

    /// Store new, already sequenced transactions.
    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError>;

    /// Overwrite existing transactions (status transitions). Identity, owning
    /// instance and sequence must not change.
    fn replace_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError>;

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    fn transactions_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Transactions with `sequence > after`, in sequence order.
    fn transactions_after(
        &self,
        instance_id: InstanceId,
        after: u64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Highest stored sequence for the instance, 0 when none.
    fn max_sequence(&self, instance_id: InstanceId) -> Result<u64, StoreError>;
}

impl<S> TransactionLogStore for Arc<S>
where
    S: TransactionLogStore + ?Sized,
{
    fn insert_instance_if_absent(
        &self,
        record: InstanceRecord,
    ) -> Result<(InstanceRecord, bool), StoreError> {
        (**self).insert_instance_if_absent(record)
    }

    fn get_instance(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>, StoreError> {
        (**self).get_instance(instance_id)
    }

    fn find_instance(
        &self,
        owner: AvatarId,
        saga_ref: &SagaRef,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        (**self).find_instance(owner, saga_ref)
    }

    fn instances_for_owner(&self, owner: AvatarId) -> Result<Vec<InstanceRecord>, StoreError> {
        (**self).instances_for_owner(owner)
    }

    fn instance_count(&self) -> Result<usize, StoreError> {
        (**self).instance_count()
    }

    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        (**self).append_transactions(transactions)
    }

    fn replace_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        (**self).replace_transactions(transactions)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).get_transaction(id)
    }

    fn transactions_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<Transaction>, StoreError> {
        (**self).transactions_for_instance(instance_id)
    }

    fn transactions_after(
        &self,
        instance_id: InstanceId,
        after: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        (**self).transactions_after(instance_id, after)
    }

    fn max_sequence(&self, instance_id: InstanceId) -> Result<u64, StoreError> {
        (**self).max_sequence(instance_id)
    }
}
