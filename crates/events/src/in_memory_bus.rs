//! In-process commit feed.

use std::sync::{Mutex, mpsc};

use crate::bus::{CommitFeed, CommittedBatch, FeedError, Subscription};

/// Broadcasts each batch to every live subscriber over std channels.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct InMemoryCommitFeed {
    subscribers: Mutex<Vec<mpsc::Sender<CommittedBatch>>>,
}

impl InMemoryCommitFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }
}

impl CommitFeed for InMemoryCommitFeed {
    fn publish(&self, batch: CommittedBatch) -> Result<(), FeedError> {
        let mut subs = self.subscribers.lock().map_err(|_| FeedError::Poisoned)?;
        subs.retain(|tx| tx.send(batch.clone()).is_ok());
        tracing::trace!(
            instance_id = %batch.instance_id,
            subscribers = subs.len(),
            "published committed batch"
        );
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(_) => tracing::warn!("commit feed lock poisoned; subscription will stay empty"),
        }
        Subscription::new(rx)
    }
}
