//! Resource-gated admission of task starts.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Usage {
    threads: u32,
    memory: u32,
}

/// Gates task starts on the global thread and memory budget.
///
/// `acquire` blocks until the request fits under both caps; every release
/// broadcasts, and each waiter re-tests the predicate on wakeup. Large
/// requests can starve behind a stream of small ones; that is accepted.
pub struct ResourceGovernor {
    max_threads: u32,
    max_memory: u32,
    usage: Mutex<Usage>,
    released: Notify,
}

impl ResourceGovernor {
    /// Config validation guarantees no single request exceeds the caps, so
    /// every acquire is eventually satisfiable.
    pub fn new(max_threads: u32, max_memory: u32) -> Self {
        Self {
            max_threads,
            max_memory,
            usage: Mutex::new(Usage::default()),
            released: Notify::new(),
        }
    }

    /// Reserve `threads` and `memory`, waiting until both fit under the
    /// global caps. The returned lease releases the reservation on drop.
    pub async fn acquire(&self, threads: u32, memory: u32) -> ResourceLease<'_> {
        loop {
            // Register for the broadcast before testing the predicate so a
            // release between the test and the await is not missed.
            let released = self.released.notified();
            {
                let mut usage = self.usage.lock().expect("governor lock poisoned");
                if usage.threads + threads <= self.max_threads
                    && usage.memory + memory <= self.max_memory
                {
                    usage.threads += threads;
                    usage.memory += memory;
                    return ResourceLease {
                        governor: self,
                        threads,
                        memory,
                    };
                }
            }
            released.await;
        }
    }

    fn release(&self, threads: u32, memory: u32) {
        {
            let mut usage = self.usage.lock().expect("governor lock poisoned");
            usage.threads -= threads;
            usage.memory -= memory;
        }
        self.released.notify_waiters();
    }

    /// Currently reserved `(threads, memory)`.
    pub fn in_use(&self) -> (u32, u32) {
        let usage = self.usage.lock().expect("governor lock poisoned");
        (usage.threads, usage.memory)
    }
}

/// A live reservation. Dropping it returns the resources and wakes all
/// waiters, so terminal task states release unconditionally.
pub struct ResourceLease<'a> {
    governor: &'a ResourceGovernor,
    threads: u32,
    memory: u32,
}

impl Drop for ResourceLease<'_> {
    fn drop(&mut self) {
        self.governor.release(self.threads, self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lease_drop_releases() {
        let governor = Arc::new(ResourceGovernor::new(4, 8));
        let lease = governor.acquire(3, 6).await;
        assert_eq!(governor.in_use(), (3, 6));
        drop(lease);
        assert_eq!(governor.in_use(), (0, 0));
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let governor = Arc::new(ResourceGovernor::new(4, 4));
        let first = governor.acquire(3, 1).await;

        let waiter = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                let _lease = governor.acquire(3, 1).await;
            })
        };

        // The second request cannot fit while the first lease is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_usage_never_exceeds_caps() {
        let governor = Arc::new(ResourceGovernor::new(4, 4));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let governor = Arc::clone(&governor);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _lease = governor.acquire(3, 3).await;
                let (threads, _) = governor.in_use();
                peak.fetch_max(threads, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(governor.in_use(), (0, 0));
    }
}
