// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::config::ThreadPoolConfig;

/// Bounded set of workers shared by all methods of one interface.
///
/// Calls run as tokio tasks. At most [`ThreadPoolConfig::concurrency`] run at once. When the
/// pool has a queue, callers beyond that wait for a worker in arrival order up to the queue's
/// capacity; without one they are rejected immediately.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    name: Arc<str>,
    running: AtomicUsize,
    queued: AtomicUsize,
    released: Notify,
}

impl WorkerPool {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            running: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for a free worker. Returns `None` when the pool and its queue are full.
    pub async fn acquire(self: &Arc<Self>, config: &ThreadPoolConfig) -> Option<WorkerSlot> {
        let concurrency = config.concurrency();

        if let Some(slot) = self.try_run(concurrency) {
            return Some(slot);
        }

        let _queued = self.try_enqueue(config.queue_capacity())?;

        loop {
            let mut notified = pin!(self.released.notified());
            notified.as_mut().enable();

            if let Some(slot) = self.try_run(concurrency) {
                return Some(slot);
            }

            notified.await;
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    fn try_run(self: &Arc<Self>, concurrency: usize) -> Option<WorkerSlot> {
        increment_below(&self.running, concurrency).then(|| WorkerSlot { pool: Arc::clone(self) })
    }

    fn try_enqueue(&self, capacity: usize) -> Option<QueuePosition<'_>> {
        increment_below(&self.queued, capacity).then_some(QueuePosition { pool: self })
    }
}

fn increment_below(counter: &AtomicUsize, limit: usize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| (value < limit).then_some(value + 1))
        .is_ok()
}

/// A running call. Dropping it frees the worker and wakes one waiting caller.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pool: Arc<WorkerPool>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.pool.running.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.notify_one();
    }
}

struct QueuePosition<'a> {
    pool: &'a WorkerPool,
}

impl Drop for QueuePosition<'_> {
    fn drop(&mut self) {
        self.pool.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::FutureExt;

    use super::*;

    fn config(core_size: u32, maximum_size: u32, max_queue_size: i32) -> ThreadPoolConfig {
        ThreadPoolConfig {
            core_size,
            maximum_size,
            max_queue_size,
        }
    }

    #[tokio::test]
    async fn synchronous_hand_off_rejects_when_saturated() {
        let pool = Arc::new(WorkerPool::new("Svc"));
        let config = config(1, 2, -1);

        let first = pool.acquire(&config).await.unwrap();
        let _second = pool.acquire(&config).await.unwrap();
        assert_eq!(pool.running(), 2);

        assert!(pool.acquire(&config).now_or_never().unwrap().is_none());

        drop(first);
        assert!(pool.acquire(&config).await.is_some());
    }

    #[tokio::test]
    async fn queued_caller_waits_for_worker() {
        let pool = Arc::new(WorkerPool::new("Svc"));
        let config = config(1, 1, 1);

        let running = pool.acquire(&config).await.unwrap();

        let waiting = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire(&config).await.is_some() }
        });

        // the queue has room for a single caller
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.acquire(&config).now_or_never().unwrap().is_none());

        drop(running);
        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_wait_frees_queue_position() {
        let pool = Arc::new(WorkerPool::new("Svc"));
        let config = config(1, 1, 1);

        let _running = pool.acquire(&config).await.unwrap();

        assert!(pool.acquire(&config).now_or_never().is_none());
        assert_eq!(pool.queued.load(Ordering::Acquire), 0);
    }

    #[test]
    fn name() {
        assert_eq!(WorkerPool::new("com.example.Greeter").name(), "com.example.Greeter");
    }
}
