use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use sagalog_core::{AvatarId, InstanceId, SagaRef, TransactionId};
use sagalog_events::{InstanceRecord, Transaction};

use super::r#trait::{StoreError, TransactionLogStore};

#[derive(Debug, Default)]
struct StoreState {
    instances: HashMap<InstanceId, InstanceRecord>,
    by_owner_saga: HashMap<(AvatarId, SagaRef), InstanceId>,
    transactions: HashMap<TransactionId, Transaction>,
    by_instance: HashMap<InstanceId, BTreeMap<u64, TransactionId>>,
}

impl StoreState {
    fn position(tx: &Transaction) -> Result<(InstanceId, u64), StoreError> {
        match (tx.instance_id(), tx.sequence()) {
            (Some(instance_id), Some(sequence)) => Ok((instance_id, sequence)),
            _ => Err(StoreError::Conflict(format!(
                "transaction {} has no sequence position",
                tx.id()
            ))),
        }
    }

    fn ordered(&self, instance_id: InstanceId, after: u64) -> Vec<Transaction> {
        let Some(index) = self.by_instance.get(&instance_id) else {
            return Vec::new();
        };
        index
            .range(after.saturating_add(1)..)
            .filter_map(|(_, id)| self.transactions.get(id).cloned())
            .collect()
    }
}

/// Serializable dump of the whole store, for fixtures and debugging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub instances: Vec<InstanceRecord>,
    pub transactions: Vec<Transaction>,
}

/// In-memory transaction log store.
///
/// Intended for tests/dev and single-process servers. One `RwLock` guards the
/// whole state, so every write is atomic with respect to every read.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLogStore {
    state: RwLock<StoreState>,
}

impl InMemoryTransactionLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, re-checking every uniqueness rule.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        for record in snapshot.instances {
            let (_, created) = store.insert_instance_if_absent(record.clone())?;
            if !created {
                return Err(StoreError::Conflict(format!(
                    "duplicate instance for avatar {} and saga {}",
                    record.owner_avatar_id, record.saga_ref
                )));
            }
        }
        store.append_transactions(&snapshot.transactions)?;
        Ok(store)
    }

    /// Copy of every record; instances ordered by creation, transactions by
    /// instance then sequence.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;

        let mut instances: Vec<InstanceRecord> = state.instances.values().cloned().collect();
        instances.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.instance_id.cmp(&b.instance_id))
        });

        let transactions = instances
            .iter()
            .flat_map(|record| state.ordered(record.instance_id, 0))
            .collect();

        Ok(StoreSnapshot {
            instances,
            transactions,
        })
    }
}

impl TransactionLogStore for InMemoryTransactionLogStore {
    fn insert_instance_if_absent(
        &self,
        record: InstanceRecord,
    ) -> Result<(InstanceRecord, bool), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        let key = (record.owner_avatar_id, record.saga_ref.clone());
        if let Some(existing) = state.by_owner_saga.get(&key) {
            let existing = state
                .instances
                .get(existing)
                .cloned()
                .ok_or(StoreError::UnknownInstance(*existing))?;
            return Ok((existing, false));
        }
        if state.instances.contains_key(&record.instance_id) {
            return Err(StoreError::Conflict(format!(
                "instance id {} already in use",
                record.instance_id
            )));
        }

        state.by_owner_saga.insert(key, record.instance_id);
        state.instances.insert(record.instance_id, record.clone());
        Ok((record, true))
    }

    fn get_instance(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.instances.get(&instance_id).cloned())
    }

    fn find_instance(
        &self,
        owner: AvatarId,
        saga_ref: &SagaRef,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .by_owner_saga
            .get(&(owner, saga_ref.clone()))
            .and_then(|id| state.instances.get(id))
            .cloned())
    }

    fn instances_for_owner(&self, owner: AvatarId) -> Result<Vec<InstanceRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut records: Vec<InstanceRecord> = state
            .instances
            .values()
            .filter(|r| r.owner_avatar_id == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.saga_ref.cmp(&b.saga_ref));
        Ok(records)
    }

    fn instance_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.instances.len())
    }

    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // Validate the whole batch before touching anything.
        let mut batch_ids = HashSet::with_capacity(transactions.len());
        let mut batch_positions = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            let (instance_id, sequence) = StoreState::position(tx)?;
            if !state.instances.contains_key(&instance_id) {
                return Err(StoreError::UnknownInstance(instance_id));
            }
            if state.transactions.contains_key(&tx.id()) || !batch_ids.insert(tx.id()) {
                return Err(StoreError::DuplicateTransaction(tx.id()));
            }
            let taken = state
                .by_instance
                .get(&instance_id)
                .is_some_and(|index| index.contains_key(&sequence));
            if taken || !batch_positions.insert((instance_id, sequence)) {
                return Err(StoreError::Conflict(format!(
                    "sequence {sequence} already taken in instance {instance_id}"
                )));
            }
        }

        for tx in transactions {
            let (instance_id, sequence) = StoreState::position(tx)?;
            state
                .by_instance
                .entry(instance_id)
                .or_default()
                .insert(sequence, tx.id());
            state.transactions.insert(tx.id(), tx.clone());
        }

        Ok(())
    }

    fn replace_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        for tx in transactions {
            let stored = state
                .transactions
                .get(&tx.id())
                .ok_or(StoreError::UnknownTransaction(tx.id()))?;
            if stored.instance_id() != tx.instance_id() || stored.sequence() != tx.sequence() {
                return Err(StoreError::Conflict(format!(
                    "transaction {} cannot move to another position",
                    tx.id()
                )));
            }
        }

        for tx in transactions {
            state.transactions.insert(tx.id(), tx.clone());
        }

        Ok(())
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.transactions.get(&id).cloned())
    }

    fn transactions_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.ordered(instance_id, 0))
    }

    fn transactions_after(
        &self,
        instance_id: InstanceId,
        after: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.ordered(instance_id, after))
    }

    fn max_sequence(&self, instance_id: InstanceId) -> Result<u64, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .by_instance
            .get(&instance_id)
            .and_then(|index| index.last_key_value())
            .map(|(sequence, _)| *sequence)
            .unwrap_or(0))
    }
}
