//! Commit feed: fan-out of committed batches to downstream readers.
//!
//! Quest evaluation, anti-cheat analysis and similar consumers read committed
//! transactions; they never write back through the feed. The log store stays
//! the source of truth, so a consumer that misses a batch can always re-read
//! the instance from the repository.
//!
//! Delivery is at-least-once from the consumer's point of view and consumers
//! must tolerate duplicates. Batches for one instance are published in commit
//! order; ordering across instances is unspecified.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use sagalog_core::{AvatarId, InstanceId};

use crate::transaction::Transaction;

/// A batch of transactions that became `Committed` together.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBatch {
    pub instance_id: InstanceId,
    pub owner_avatar_id: AvatarId,
    pub committed_at: DateTime<Utc>,
    /// Ordered by sequence.
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// Internal lock poisoning.
    #[error("commit feed lock poisoned")]
    Poisoned,
}

/// Receiving end of a feed subscription.
///
/// Meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<CommittedBatch>,
}

impl Subscription {
    pub fn new(receiver: Receiver<CommittedBatch>) -> Self {
        Self { receiver }
    }

    /// Block until the next batch is available.
    pub fn recv(&self) -> Result<CommittedBatch, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<CommittedBatch, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<CommittedBatch, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<CommittedBatch> {
        self.receiver.try_iter().collect()
    }
}

/// Publish/subscribe contract for committed batches.
pub trait CommitFeed: Send + Sync {
    fn publish(&self, batch: CommittedBatch) -> Result<(), FeedError>;

    fn subscribe(&self) -> Subscription;
}

impl<F> CommitFeed for Arc<F>
where
    F: CommitFeed + ?Sized,
{
    fn publish(&self, batch: CommittedBatch) -> Result<(), FeedError> {
        (**self).publish(batch)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}
