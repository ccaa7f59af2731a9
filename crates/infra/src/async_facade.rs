//! Async wrapper around the repository for tokio callers.
//!
//! The repository only takes short synchronous locks, so each call is handed
//! to the blocking pool instead of re-implementing the locking with async
//! primitives.

use std::sync::Arc;

use sagalog_core::{AvatarId, ExpectedVersion, InstanceId, SagaRef, TransactionId};
use sagalog_events::{SagaInstance, Transaction};

use crate::log_store::TransactionLogStore;
use crate::repository::{RepositoryError, RepositoryResult, SagaInstanceRepository};

pub struct AsyncSagaInstanceRepository<S> {
    inner: Arc<SagaInstanceRepository<S>>,
}

impl<S> Clone for AsyncSagaInstanceRepository<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> AsyncSagaInstanceRepository<S>
where
    S: TransactionLogStore + 'static,
{
    pub fn new(inner: Arc<SagaInstanceRepository<S>>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<SagaInstanceRepository<S>> {
        &self.inner
    }

    async fn run<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SagaInstanceRepository<S>) -> RepositoryResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|err| RepositoryError::Worker(err.to_string()))?
    }

    pub async fn get_or_create_instance(
        &self,
        avatar_id: AvatarId,
        saga_ref: SagaRef,
    ) -> RepositoryResult<SagaInstance> {
        self.run(move |repo| repo.get_or_create_instance(avatar_id, saga_ref))
            .await
    }

    pub async fn get_instance_by_id(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Option<SagaInstance>> {
        self.run(move |repo| repo.get_instance_by_id(instance_id)).await
    }

    pub async fn get_all_instances_for_avatar(
        &self,
        avatar_id: AvatarId,
    ) -> RepositoryResult<Vec<SagaInstance>> {
        self.run(move |repo| repo.get_all_instances_for_avatar(avatar_id))
            .await
    }

    pub async fn add_transactions(
        &self,
        instance_id: InstanceId,
        transactions: Vec<Transaction>,
    ) -> RepositoryResult<Vec<u64>> {
        self.run(move |repo| repo.add_transactions(instance_id, transactions))
            .await
    }

    pub async fn add_transactions_expecting(
        &self,
        instance_id: InstanceId,
        transactions: Vec<Transaction>,
        expected: ExpectedVersion,
    ) -> RepositoryResult<Vec<u64>> {
        self.run(move |repo| repo.add_transactions_expecting(instance_id, transactions, expected))
            .await
    }

    pub async fn commit_transactions(
        &self,
        instance_id: InstanceId,
        transaction_ids: Vec<TransactionId>,
    ) -> RepositoryResult<bool> {
        self.run(move |repo| repo.commit_transactions(instance_id, &transaction_ids))
            .await
    }

    pub async fn rollback_transactions(
        &self,
        instance_id: InstanceId,
        transaction_ids: Vec<TransactionId>,
    ) -> RepositoryResult<usize> {
        self.run(move |repo| repo.rollback_transactions(instance_id, &transaction_ids))
            .await
    }

    pub async fn get_transactions(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.run(move |repo| repo.get_transactions(instance_id)).await
    }

    pub async fn get_transactions_after_sequence(
        &self,
        instance_id: InstanceId,
        sequence: u64,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.run(move |repo| repo.get_transactions_after_sequence(instance_id, sequence))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::Utc;
    use sagalog_events::{CurrencyChanged, SagaEvent};

    use crate::log_store::InMemoryTransactionLogStore;

    fn facade() -> AsyncSagaInstanceRepository<InMemoryTransactionLogStore> {
        AsyncSagaInstanceRepository::new(Arc::new(SagaInstanceRepository::new(
            InMemoryTransactionLogStore::new(),
        )))
    }

    fn currency(owner: AvatarId, delta: i64) -> Transaction {
        Transaction::from_event(
            owner,
            &SagaEvent::CurrencyChanged(CurrencyChanged { delta }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn add_and_commit_through_the_facade() {
        let repo = facade();
        let avatar = AvatarId::new();
        let instance = repo
            .get_or_create_instance(avatar, "Harbor".into())
            .await
            .unwrap();

        let txs = vec![currency(avatar, 1), currency(avatar, 2)];
        let ids: Vec<TransactionId> = txs.iter().map(Transaction::id).collect();
        assert_eq!(
            repo.add_transactions(instance.instance_id(), txs).await.unwrap(),
            vec![1, 2]
        );
        assert!(repo.commit_transactions(instance.instance_id(), ids).await.unwrap());

        let log = repo.get_transactions(instance.instance_id()).await.unwrap();
        assert!(log.iter().all(Transaction::is_committed));
        assert_eq!(
            repo.get_transactions_after_sequence(instance.instance_id(), 1)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_share_one_instance() {
        let repo = facade();
        let avatar = AvatarId::new();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.get_or_create_instance(avatar, "Harbor".into())
                        .await
                        .unwrap()
                        .instance_id()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.inner().store().instance_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_instances_surface_as_errors() {
        let repo = facade();
        assert!(matches!(
            repo.rollback_transactions(InstanceId::new(), vec![]).await,
            Err(RepositoryError::InstanceNotFound(_))
        ));
    }
}
