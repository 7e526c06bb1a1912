//! A single-consumer FIFO work queue used to serialize callback delivery
//! and reconciler housekeeping onto one logical thread of execution.
//!
//! Submitted closures run strictly in submission order on a single
//! dispatcher task, which is what lets callers rely on talkgroup
//! notifications arriving in the order devices were processed.

use tokio::sync::{mpsc, oneshot};

use crate::runtime::TaskSpawner;

/// Default maximum number of queued closures before `submit` is rejected.
pub const DEFAULT_MAX_DEPTH: usize = 512;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Item {
    Fire(Job),
    FireAndSignal(Job, oneshot::Sender<()>),
}

/// A FIFO queue with a single dispatcher consuming submitted closures.
pub struct WorkQueue {
    sender: mpsc::Sender<Item>,
}

impl WorkQueue {
    /// Creates and starts a work queue with the default maximum depth,
    /// spawning its dispatcher task on `spawner`.
    pub fn start(spawner: &dyn TaskSpawner) -> Self {
        Self::with_max_depth(spawner, DEFAULT_MAX_DEPTH)
    }

    /// Creates and starts a work queue with an explicit maximum depth.
    pub fn with_max_depth(spawner: &dyn TaskSpawner, max_depth: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Item>(max_depth.max(1));

        spawner.spawn(async move {
            while let Some(item) = receiver.recv().await {
                match item {
                    Item::Fire(job) => job(),
                    Item::FireAndSignal(job, done) => {
                        job();
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { sender }
    }

    /// Submits a closure for asynchronous execution on the dispatcher task.
    ///
    /// Returns `false` if the queue is full or its dispatcher has stopped;
    /// the caller is expected to treat this the same as a dropped
    /// submission, not a hard error.
    pub fn submit<F>(&self, op: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.try_send(Item::Fire(Box::new(op))).is_ok()
    }

    /// Submits a closure and waits for it to complete before returning.
    ///
    /// Returns `false` without running `op` if the queue is full or
    /// stopped.
    pub async fn submit_and_wait<F>(&self, op: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .sender
            .try_send(Item::FireAndSignal(Box::new(op), done_tx))
            .is_err()
        {
            return false;
        }
        done_rx.await.is_ok()
    }
}
