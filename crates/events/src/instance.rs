use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sagalog_core::{AggregateRoot, AvatarId, InstanceId, SagaRef, TransactionId};

use crate::transaction::Transaction;

/// Persisted instance header (the log itself is stored per transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub saga_ref: SagaRef,
    pub owner_avatar_id: AvatarId,
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(owner_avatar_id: AvatarId, saga_ref: SagaRef, created_at: DateTime<Utc>) -> Self {
        Self {
            instance_id: InstanceId::new(),
            saga_ref,
            owner_avatar_id,
            created_at,
        }
    }
}

/// Immutable snapshot of an instance's transactions, ordered by sequence.
///
/// Cloning shares the underlying buffer. A snapshot never changes after it was
/// built; newer state is observed by fetching a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLog(Arc<[Transaction]>);

impl Default for TransactionLog {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl TransactionLog {
    /// Build a snapshot, sorting by sequence (unsequenced entries last, stable).
    pub fn new(mut transactions: Vec<Transaction>) -> Self {
        transactions.sort_by_key(|t| t.sequence().unwrap_or(u64::MAX));
        Self(transactions.into())
    }

    pub fn as_slice(&self) -> &[Transaction] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.0.iter()
    }

    /// Committed transactions in sequence order.
    pub fn committed(&self) -> impl Iterator<Item = &Transaction> {
        self.0.iter().filter(|t| t.is_committed())
    }

    pub fn get(&self, id: TransactionId) -> Option<&Transaction> {
        self.0.iter().find(|t| t.id() == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest sequence in the snapshot, 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        self.0.iter().filter_map(Transaction::sequence).max().unwrap_or(0)
    }

    pub fn to_vec(&self) -> Vec<Transaction> {
        self.0.to_vec()
    }
}

impl<'a> IntoIterator for &'a TransactionLog {
    type Item = &'a Transaction;
    type IntoIter = core::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Aggregate root: one per (avatar, saga) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaInstance {
    record: InstanceRecord,
    transactions: TransactionLog,
}

impl SagaInstance {
    pub fn new(record: InstanceRecord, transactions: TransactionLog) -> Self {
        Self { record, transactions }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.record.instance_id
    }

    pub fn saga_ref(&self) -> &SagaRef {
        &self.record.saga_ref
    }

    pub fn owner_avatar_id(&self) -> AvatarId {
        self.record.owner_avatar_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn record(&self) -> &InstanceRecord {
        &self.record
    }

    pub fn transactions(&self) -> &TransactionLog {
        &self.transactions
    }
}

impl AggregateRoot for SagaInstance {
    type Id = InstanceId;

    fn id(&self) -> &Self::Id {
        &self.record.instance_id
    }

    fn version(&self) -> u64 {
        self.transactions.last_sequence()
    }
}
