//! Saga instance repository: the concurrency core of the transaction log.
//!
//! Sits between callers (interaction service, quest/trade/dialogue systems) and
//! the [`TransactionLogStore`]. It owns three rules:
//!
//! - one instance per `(avatar, saga)` pair, whatever the interleaving of
//!   concurrent `get_or_create_instance` calls;
//! - contiguous, collision-free sequence numbers per instance;
//! - all-or-nothing commit and rollback of pending batches.
//!
//! ```text
//! add_transactions ──► assign sequence (Pending) ──► store.append
//! commit_transactions ──► validate whole batch ──► store.replace ──► commit feed
//! ```
//!
//! Mutations take a per-instance critical section (see [`KeyedLocks`]); calls
//! on different instances never contend. Reads return owned copies, so a caller
//! iterating a log can never observe it mid-write.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sagalog_core::{
    AvatarId, Clock, ExpectedVersion, InstanceId, SagaRef, SystemClock, TransactionId,
};
use sagalog_events::{
    CommitFeed, CommittedBatch, InstanceRecord, SagaInstance, Transaction, TransactionLog,
};

use crate::locks::KeyedLocks;
use crate::log_store::{StoreError, TransactionLogStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("saga instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Optimistic concurrency failure on `add_transactions_expecting`.
    #[error("instance {instance_id} is at sequence {actual}, expected {expected:?}")]
    Conflict {
        instance_id: InstanceId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("transaction {id} cannot be added: {reason}")]
    InvalidTransaction { id: TransactionId, reason: String },

    #[error("transaction {0} was already added")]
    DuplicateTransaction(TransactionId),

    /// A blocking task backing the async façade failed to complete.
    #[error("repository worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Concurrency-safe façade over a [`TransactionLogStore`].
pub struct SagaInstanceRepository<S> {
    store: S,
    clock: Arc<dyn Clock>,
    feed: Option<Arc<dyn CommitFeed>>,
    instance_locks: KeyedLocks<InstanceId>,
    creation_locks: KeyedLocks<(AvatarId, SagaRef)>,
}

impl<S> SagaInstanceRepository<S>
where
    S: TransactionLogStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            feed: None,
            instance_locks: KeyedLocks::new(),
            creation_locks: KeyedLocks::new(),
        }
    }

    /// Use `clock` for `created_at` and commit `server_time`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish every committed batch to `feed`.
    pub fn with_commit_feed(mut self, feed: Arc<dyn CommitFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Return the instance for `(avatar_id, saga_ref)`, creating it if needed.
    ///
    /// Concurrent callers with the same arguments all get the same instance id
    /// and the store ends up with exactly one record.
    #[instrument(skip_all, fields(avatar_id = %avatar_id, saga_ref = %saga_ref))]
    pub fn get_or_create_instance(
        &self,
        avatar_id: AvatarId,
        saga_ref: SagaRef,
    ) -> RepositoryResult<SagaInstance> {
        let key = (avatar_id, saga_ref.clone());
        let record = self.creation_locks.with_lock(&key, || -> RepositoryResult<InstanceRecord> {
            if let Some(existing) = self.store.find_instance(avatar_id, &saga_ref)? {
                return Ok(existing);
            }
            let candidate = InstanceRecord::new(avatar_id, saga_ref.clone(), self.clock.now());
            let (record, created) = self.store.insert_instance_if_absent(candidate)?;
            if created {
                info!(instance_id = %record.instance_id, "saga instance created");
            }
            Ok(record)
        })?;

        self.load(record)
    }

    /// Instance with its full log (every status), or `None`.
    pub fn get_instance_by_id(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Option<SagaInstance>> {
        match self.store.get_instance(instance_id)? {
            Some(record) => self.load(record).map(Some),
            None => Ok(None),
        }
    }

    /// Every instance the avatar owns, each holding only its committed
    /// transactions. Ordered by saga reference.
    pub fn get_all_instances_for_avatar(
        &self,
        avatar_id: AvatarId,
    ) -> RepositoryResult<Vec<SagaInstance>> {
        self.store
            .instances_for_owner(avatar_id)?
            .into_iter()
            .map(|record| -> RepositoryResult<SagaInstance> {
                let committed = self
                    .store
                    .transactions_for_instance(record.instance_id)?
                    .into_iter()
                    .filter(Transaction::is_committed)
                    .collect();
                Ok(SagaInstance::new(record, TransactionLog::new(committed)))
            })
            .collect()
    }

    /// Append a batch as `Pending`, returning the assigned sequences in input
    /// order.
    pub fn add_transactions(
        &self,
        instance_id: InstanceId,
        transactions: Vec<Transaction>,
    ) -> RepositoryResult<Vec<u64>> {
        self.add_transactions_expecting(instance_id, transactions, ExpectedVersion::Any)
    }

    /// Optimistic variant of [`Self::add_transactions`]: the instance's highest
    /// sequence must match `expected` at the moment of the append.
    #[instrument(skip_all, fields(instance_id = %instance_id, count = transactions.len()))]
    pub fn add_transactions_expecting(
        &self,
        instance_id: InstanceId,
        mut transactions: Vec<Transaction>,
        expected: ExpectedVersion,
    ) -> RepositoryResult<Vec<u64>> {
        Self::validate_new(&transactions)?;

        self.instance_locks.with_lock(&instance_id, || -> RepositoryResult<Vec<u64>> {
            self.ensure_instance(instance_id)?;

            let current = self.store.max_sequence(instance_id)?;
            if !expected.matches(current) {
                debug!(?expected, actual = current, "append refused on version");
                return Err(RepositoryError::Conflict {
                    instance_id,
                    expected,
                    actual: current,
                });
            }

            for tx in &transactions {
                if self.store.get_transaction(tx.id())?.is_some() {
                    return Err(RepositoryError::DuplicateTransaction(tx.id()));
                }
            }

            let mut sequences = Vec::with_capacity(transactions.len());
            for (offset, tx) in transactions.iter_mut().enumerate() {
                let sequence = current + offset as u64 + 1;
                tx.assign(instance_id, sequence)
                    .map_err(|err| RepositoryError::InvalidTransaction {
                        id: tx.id(),
                        reason: err.to_string(),
                    })?;
                sequences.push(sequence);
            }

            self.store.append_transactions(&transactions)?;
            debug!(first = ?sequences.first(), last = ?sequences.last(), "transactions appended");
            Ok(sequences)
        })
    }

    /// Commit the named pending transactions as one batch.
    ///
    /// `Ok(false)` when any id is unknown, belongs to another instance, is not
    /// `Pending` or appears twice; nothing changes in that case. `Err` only when
    /// the instance does not exist or the store fails.
    #[instrument(skip_all, fields(instance_id = %instance_id, count = transaction_ids.len()))]
    pub fn commit_transactions(
        &self,
        instance_id: InstanceId,
        transaction_ids: &[TransactionId],
    ) -> RepositoryResult<bool> {
        self.instance_locks.with_lock(&instance_id, || -> RepositoryResult<bool> {
            let record = self.ensure_instance(instance_id)?;
            if transaction_ids.is_empty() {
                return Ok(true);
            }

            let mut seen = HashSet::with_capacity(transaction_ids.len());
            let mut batch = Vec::with_capacity(transaction_ids.len());
            for id in transaction_ids {
                if !seen.insert(*id) {
                    warn!(transaction_id = %id, "commit refused: id repeated in batch");
                    return Ok(false);
                }
                let Some(tx) = self.store.get_transaction(*id)? else {
                    warn!(transaction_id = %id, "commit refused: unknown transaction");
                    return Ok(false);
                };
                if tx.instance_id() != Some(instance_id) {
                    warn!(transaction_id = %id, "commit refused: transaction belongs to another instance");
                    return Ok(false);
                }
                if !tx.is_pending() {
                    warn!(transaction_id = %id, status = ?tx.status(), "commit refused: not pending");
                    return Ok(false);
                }
                batch.push(tx);
            }

            let server_time = self.clock.now();
            for tx in &mut batch {
                if tx.commit(server_time).is_err() {
                    return Ok(false);
                }
            }
            self.store.replace_transactions(&batch)?;
            info!(count = batch.len(), "transactions committed");

            if let Some(feed) = &self.feed {
                batch.sort_by_key(Transaction::sequence);
                let published = feed.publish(CommittedBatch {
                    instance_id,
                    owner_avatar_id: record.owner_avatar_id,
                    committed_at: server_time,
                    transactions: batch,
                });
                if let Err(err) = published {
                    warn!(error = %err, "committed batch not published");
                }
            }

            Ok(true)
        })
    }

    /// Mark the named pending transactions `Rejected`.
    ///
    /// Unknown, foreign and already settled ids are skipped. Returns how many
    /// transactions were rejected.
    #[instrument(skip_all, fields(instance_id = %instance_id, count = transaction_ids.len()))]
    pub fn rollback_transactions(
        &self,
        instance_id: InstanceId,
        transaction_ids: &[TransactionId],
    ) -> RepositoryResult<usize> {
        self.instance_locks.with_lock(&instance_id, || -> RepositoryResult<usize> {
            self.ensure_instance(instance_id)?;

            let mut seen = HashSet::with_capacity(transaction_ids.len());
            let mut batch = Vec::new();
            for id in transaction_ids {
                if !seen.insert(*id) {
                    continue;
                }
                match self.store.get_transaction(*id)? {
                    Some(mut tx) if tx.instance_id() == Some(instance_id) && tx.is_pending() => {
                        if tx.reject().is_ok() {
                            batch.push(tx);
                        }
                    }
                    _ => debug!(transaction_id = %id, "rollback skipped id"),
                }
            }

            self.store.replace_transactions(&batch)?;
            if !batch.is_empty() {
                info!(count = batch.len(), "transactions rolled back");
            }
            Ok(batch.len())
        })
    }

    /// Every transaction of the instance, ordered by sequence.
    pub fn get_transactions(&self, instance_id: InstanceId) -> RepositoryResult<Vec<Transaction>> {
        self.ensure_instance(instance_id)?;
        Ok(self.store.transactions_for_instance(instance_id)?)
    }

    /// Transactions with a sequence strictly greater than `sequence`.
    pub fn get_transactions_after_sequence(
        &self,
        instance_id: InstanceId,
        sequence: u64,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.ensure_instance(instance_id)?;
        Ok(self.store.transactions_after(instance_id, sequence)?)
    }

    fn ensure_instance(&self, instance_id: InstanceId) -> RepositoryResult<InstanceRecord> {
        self.store
            .get_instance(instance_id)?
            .ok_or(RepositoryError::InstanceNotFound(instance_id))
    }

    fn load(&self, record: InstanceRecord) -> RepositoryResult<SagaInstance> {
        let transactions = self.store.transactions_for_instance(record.instance_id)?;
        Ok(SagaInstance::new(record, TransactionLog::new(transactions)))
    }

    fn validate_new(transactions: &[Transaction]) -> RepositoryResult<()> {
        let mut ids = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            if !tx.is_pending() {
                return Err(RepositoryError::InvalidTransaction {
                    id: tx.id(),
                    reason: format!("status is {:?}, expected Pending", tx.status()),
                });
            }
            if tx.sequence().is_some() || tx.instance_id().is_some() {
                return Err(RepositoryError::InvalidTransaction {
                    id: tx.id(),
                    reason: "already sequenced".to_string(),
                });
            }
            if !ids.insert(tx.id()) {
                return Err(RepositoryError::DuplicateTransaction(tx.id()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use sagalog_core::FixedClock;
    use sagalog_events::{
        CurrencyChanged, InMemoryCommitFeed, PlayerEntered, SagaEvent, TransactionStatus,
    };

    use crate::log_store::InMemoryTransactionLogStore;

    type Repo = SagaInstanceRepository<Arc<InMemoryTransactionLogStore>>;

    fn repo() -> Arc<Repo> {
        Arc::new(SagaInstanceRepository::new(Arc::new(
            InMemoryTransactionLogStore::new(),
        )))
    }

    fn tx(owner: AvatarId, delta: i64) -> Transaction {
        Transaction::from_event(
            owner,
            &SagaEvent::CurrencyChanged(CurrencyChanged { delta }),
            Utc::now(),
        )
    }

    fn batch(owner: AvatarId, n: usize) -> Vec<Transaction> {
        (0..n).map(|i| tx(owner, i as i64)).collect()
    }

    #[test]
    fn get_or_create_returns_the_same_instance() {
        let repo = repo();
        let avatar = AvatarId::new();

        let a = repo.get_or_create_instance(avatar, "Harbor".into()).unwrap();
        let b = repo.get_or_create_instance(avatar, "Harbor".into()).unwrap();
        let c = repo.get_or_create_instance(avatar, "Desert".into()).unwrap();

        assert_eq!(a.instance_id(), b.instance_id());
        assert_ne!(a.instance_id(), c.instance_id());
        assert_eq!(repo.store().instance_count().unwrap(), 2);
    }

    #[test]
    fn concurrent_get_or_create_yields_one_instance() {
        let repo = repo();
        let avatar = AvatarId::new();
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let repo = repo.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    repo.get_or_create_instance(avatar, "Harbor".into())
                        .unwrap()
                        .instance_id()
                })
            })
            .collect();

        let ids: HashSet<InstanceId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.store().instance_count().unwrap(), 1);
    }

    #[test]
    fn operations_on_missing_instances_fail() {
        let repo = repo();
        let missing = InstanceId::new();

        assert!(repo.get_instance_by_id(missing).unwrap().is_none());
        assert!(matches!(
            repo.add_transactions(missing, batch(AvatarId::new(), 1)),
            Err(RepositoryError::InstanceNotFound(id)) if id == missing
        ));
        assert!(matches!(
            repo.commit_transactions(missing, &[]),
            Err(RepositoryError::InstanceNotFound(_))
        ));
        assert!(matches!(
            repo.get_transactions(missing),
            Err(RepositoryError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn sequences_continue_from_the_highest_existing() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance = repo.get_or_create_instance(avatar, "Harbor".into()).unwrap();

        let first = repo.add_transactions(instance.instance_id(), batch(avatar, 3)).unwrap();
        let second = repo.add_transactions(instance.instance_id(), batch(avatar, 2)).unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5]);
        assert_eq!(
            repo.get_transactions_after_sequence(instance.instance_id(), 3)
                .unwrap()
                .iter()
                .filter_map(Transaction::sequence)
                .collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn concurrent_batches_get_contiguous_sequences() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();
        repo.add_transactions(instance_id, batch(avatar, 4)).unwrap();

        let sizes = [3usize, 1, 5, 2, 4, 7, 1, 3];
        let barrier = Arc::new(Barrier::new(sizes.len()));
        let handles: Vec<_> = sizes
            .iter()
            .map(|&n| {
                let repo = repo.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    repo.add_transactions(instance_id, batch(avatar, n)).unwrap()
                })
            })
            .collect();

        let mut issued: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        issued.sort_unstable();
        let total: usize = sizes.iter().sum();
        assert_eq!(issued, (5..=4 + total as u64).collect::<Vec<_>>());
    }

    #[test]
    fn expected_version_guards_the_append() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();

        repo.add_transactions_expecting(instance_id, batch(avatar, 2), ExpectedVersion::Exact(0))
            .unwrap();
        let err = repo
            .add_transactions_expecting(instance_id, batch(avatar, 1), ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { actual: 2, .. }));
    }

    #[test]
    fn settled_or_repeated_transactions_are_refused_on_add() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();

        let mut committed = tx(avatar, 1);
        committed.commit(Utc::now()).unwrap();
        assert!(matches!(
            repo.add_transactions(instance_id, vec![committed]),
            Err(RepositoryError::InvalidTransaction { .. })
        ));

        let once = tx(avatar, 1);
        assert!(matches!(
            repo.add_transactions(instance_id, vec![once.clone(), once.clone()]),
            Err(RepositoryError::DuplicateTransaction(_))
        ));
        repo.add_transactions(instance_id, vec![once.clone()]).unwrap();
        assert!(matches!(
            repo.add_transactions(instance_id, vec![once]),
            Err(RepositoryError::DuplicateTransaction(_))
        ));
        assert_eq!(repo.get_transactions(instance_id).unwrap().len(), 1);
    }

    #[test]
    fn commit_stamps_server_time_on_every_transaction() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let repo = SagaInstanceRepository::new(InMemoryTransactionLogStore::new())
            .with_clock(Arc::new(FixedClock(at)));
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();

        let txs = batch(avatar, 3);
        let ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
        repo.add_transactions(instance_id, txs).unwrap();

        assert!(repo.commit_transactions(instance_id, &ids).unwrap());
        for tx in repo.get_transactions(instance_id).unwrap() {
            assert_eq!(tx.status(), TransactionStatus::Committed);
            assert_eq!(tx.server_time(), Some(at));
        }
    }

    #[test]
    fn commit_with_an_unknown_id_changes_nothing() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();
        let txs = batch(avatar, 3);
        let mut ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
        repo.add_transactions(instance_id, txs).unwrap();

        ids.push(TransactionId::new());
        assert!(!repo.commit_transactions(instance_id, &ids).unwrap());

        for tx in repo.get_transactions(instance_id).unwrap() {
            assert!(tx.is_pending());
            assert_eq!(tx.server_time(), None);
        }
    }

    #[test]
    fn commit_refuses_foreign_settled_and_repeated_ids() {
        let repo = repo();
        let avatar = AvatarId::new();
        let harbor = repo.get_or_create_instance(avatar, "Harbor".into()).unwrap().instance_id();
        let desert = repo.get_or_create_instance(avatar, "Desert".into()).unwrap().instance_id();

        let own = tx(avatar, 1);
        let foreign = tx(avatar, 2);
        let (own_id, foreign_id) = (own.id(), foreign.id());
        repo.add_transactions(harbor, vec![own]).unwrap();
        repo.add_transactions(desert, vec![foreign]).unwrap();

        assert!(!repo.commit_transactions(harbor, &[own_id, foreign_id]).unwrap());
        assert!(!repo.commit_transactions(harbor, &[own_id, own_id]).unwrap());
        assert!(repo.commit_transactions(harbor, &[own_id]).unwrap());
        assert!(!repo.commit_transactions(harbor, &[own_id]).unwrap());
        assert!(repo.commit_transactions(harbor, &[]).unwrap());
    }

    #[test]
    fn rollback_rejects_pending_and_ignores_the_rest() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();
        let txs = batch(avatar, 3);
        let ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
        repo.add_transactions(instance_id, txs).unwrap();
        assert!(repo.commit_transactions(instance_id, &ids[..1]).unwrap());

        let rejected = repo
            .rollback_transactions(instance_id, &[ids[0], ids[1], ids[2], TransactionId::new()])
            .unwrap();
        assert_eq!(rejected, 2);

        let statuses: Vec<TransactionStatus> = repo
            .get_transactions(instance_id)
            .unwrap()
            .iter()
            .map(Transaction::status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                TransactionStatus::Committed,
                TransactionStatus::Rejected,
                TransactionStatus::Rejected
            ]
        );

        // Rejected transactions keep their sequence; new ones continue after them.
        assert_eq!(repo.add_transactions(instance_id, batch(avatar, 1)).unwrap(), vec![4]);
        assert_eq!(repo.rollback_transactions(instance_id, &[ids[1]]).unwrap(), 0);
    }

    #[test]
    fn avatar_listing_holds_committed_transactions_only() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();
        repo.get_or_create_instance(avatar, "Desert".into()).unwrap();
        repo.get_or_create_instance(AvatarId::new(), "Harbor".into()).unwrap();

        let txs = batch(avatar, 2);
        let first = txs[0].id();
        repo.add_transactions(instance_id, txs).unwrap();
        repo.commit_transactions(instance_id, &[first]).unwrap();

        let instances = repo.get_all_instances_for_avatar(avatar).unwrap();
        let sagas: Vec<&str> = instances.iter().map(|i| i.saga_ref().as_str()).collect();
        assert_eq!(sagas, vec!["Desert", "Harbor"]);
        assert_eq!(instances[1].transactions().len(), 1);
        assert!(instances[1].transactions().iter().all(Transaction::is_committed));
    }

    #[test]
    fn readers_hold_stable_snapshots_while_writers_append() {
        let repo = repo();
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();

        let writer = {
            let repo = repo.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let txs = batch(avatar, 2);
                    let ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
                    repo.add_transactions(instance_id, txs).unwrap();
                    assert!(repo.commit_transactions(instance_id, &ids).unwrap());
                }
            })
        };

        let reader = {
            let repo = repo.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let instance = repo.get_instance_by_id(instance_id).unwrap().unwrap();
                    let snapshot = instance.transactions().clone();
                    thread::sleep(Duration::from_micros(10));
                    let seqs: Vec<u64> = snapshot.iter().filter_map(Transaction::sequence).collect();
                    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
                    assert_eq!(snapshot.len(), seqs.len());
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(repo.get_transactions(instance_id).unwrap().len(), 400);
    }

    #[test]
    fn concurrent_commit_and_rollback_of_one_batch_never_mix() {
        for _ in 0..20 {
            let repo = repo();
            let avatar = AvatarId::new();
            let instance_id = repo
                .get_or_create_instance(avatar, "Harbor".into())
                .unwrap()
                .instance_id();
            let txs = batch(avatar, 6);
            let ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
            repo.add_transactions(instance_id, txs).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let committer = {
                let (repo, ids, barrier) = (repo.clone(), ids.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    repo.commit_transactions(instance_id, &ids).unwrap()
                })
            };
            let rollbacker = {
                let (repo, ids, barrier) = (repo.clone(), ids.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    repo.rollback_transactions(instance_id, &ids[3..]).unwrap()
                })
            };
            let committed = committer.join().unwrap();
            let rejected = rollbacker.join().unwrap();

            let statuses: Vec<TransactionStatus> = repo
                .get_transactions(instance_id)
                .unwrap()
                .iter()
                .map(Transaction::status)
                .collect();
            if committed {
                assert_eq!(rejected, 0);
                assert!(statuses.iter().all(|s| *s == TransactionStatus::Committed));
            } else {
                assert_eq!(rejected, 3);
                assert!(statuses[..3].iter().all(|s| *s == TransactionStatus::Pending));
                assert!(statuses[3..].iter().all(|s| *s == TransactionStatus::Rejected));
            }
        }
    }

    #[test]
    fn commit_feed_receives_committed_batches_in_sequence_order() {
        let feed = Arc::new(InMemoryCommitFeed::new());
        let sub = feed.subscribe();
        let repo = SagaInstanceRepository::new(InMemoryTransactionLogStore::new())
            .with_commit_feed(feed.clone());
        let avatar = AvatarId::new();
        let instance_id = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .unwrap()
            .instance_id();

        let entered = Transaction::from_event(
            avatar,
            &SagaEvent::PlayerEntered(PlayerEntered {
                saga_ref: "Harbor".into(),
            }),
            Utc::now(),
        );
        let txs = vec![entered, tx(avatar, 5)];
        let ids: Vec<TransactionId> = txs.iter().rev().map(Transaction::id).collect();
        repo.add_transactions(instance_id, txs).unwrap();

        assert!(!repo.commit_transactions(instance_id, &[TransactionId::new()]).unwrap());
        assert!(sub.try_recv().is_err());

        assert!(repo.commit_transactions(instance_id, &ids).unwrap());
        let published = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(published.instance_id, instance_id);
        assert_eq!(published.owner_avatar_id, avatar);
        assert_eq!(
            published
                .transactions
                .iter()
                .filter_map(Transaction::sequence)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]

        /// Any set of concurrent batches issues exactly the next contiguous range.
        #[test]
        fn issued_sequences_are_contiguous(
            prior in 0usize..5,
            sizes in proptest::collection::vec(1usize..6, 1..6),
        ) {
            let repo = repo();
            let avatar = AvatarId::new();
            let instance_id = repo
                .get_or_create_instance(avatar, "Harbor".into())
                .unwrap()
                .instance_id();
            repo.add_transactions(instance_id, batch(avatar, prior)).unwrap();

            let handles: Vec<_> = sizes
                .iter()
                .map(|&n| {
                    let repo = repo.clone();
                    thread::spawn(move || repo.add_transactions(instance_id, batch(avatar, n)).unwrap())
                })
                .collect();
            let mut issued: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
            issued.sort_unstable();

            let total: usize = sizes.iter().sum();
            let expected: Vec<u64> = (prior as u64 + 1..=(prior + total) as u64).collect();
            prop_assert_eq!(issued, expected);
        }
    }
}
