//! Bounded FIFO slot queue with wait-time accounting.
//!
//! Used by both the sandbox creation queue and the gateway's chat-provider
//! queue. A fixed number of slots may be held at once; further acquirers
//! wait in strict FIFO order, up to a pending cap beyond which the queue
//! fails fast with `QueueError::Full`.
//!
//! Wait durations are recorded on dequeue and a warning is emitted for any
//! wait past the configured alert threshold. A dropped waiter (cancelled
//! acquire) is skipped when its turn comes; its slot passes to the next
//! entry, so cancellation never leaks capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::QueueError;

struct Waiter {
    tx: oneshot::Sender<()>,
    enqueued: Instant,
}

struct State {
    active: usize,
    pending: VecDeque<Waiter>,
    served: u64,
    total_wait: Duration,
    longest_wait: Duration,
}

struct Inner {
    name: &'static str,
    capacity: usize,
    max_pending: usize,
    alert_after: Duration,
    state: Mutex<State>,
}

/// Read-only snapshot of queue health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub active: usize,
    pub pending: usize,
    pub capacity: usize,
    pub served: u64,
    pub mean_wait_ms: u64,
    pub longest_wait_ms: u64,
}

/// A bounded FIFO slot queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct SlotQueue {
    inner: Arc<Inner>,
}

/// An acquired slot. Dropping it hands the slot to the next waiter.
pub struct SlotPermit {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPermit").finish()
    }
}

impl SlotQueue {
    pub fn new(
        name: &'static str,
        capacity: usize,
        max_pending: usize,
        alert_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                capacity: capacity.max(1),
                max_pending,
                alert_after,
                state: Mutex::new(State {
                    active: 0,
                    pending: VecDeque::new(),
                    served: 0,
                    total_wait: Duration::ZERO,
                    longest_wait: Duration::ZERO,
                }),
            }),
        }
    }

    /// Number of requests currently waiting for a slot.
    pub fn depth(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.lock();
        let mean_wait_ms = if st.served > 0 {
            (st.total_wait.as_millis() / u128::from(st.served)) as u64
        } else {
            0
        };
        QueueStats {
            active: st.active,
            pending: st.pending.len(),
            capacity: self.inner.capacity,
            served: st.served,
            mean_wait_ms,
            longest_wait_ms: st.longest_wait.as_millis() as u64,
        }
    }

    /// Acquire a slot, waiting FIFO behind earlier requests.
    ///
    /// Fails with `QueueError::Full` when the pending queue is at its cap.
    pub async fn acquire(&self) -> Result<SlotPermit, QueueError> {
        let rx = {
            let mut st = self.lock();
            if st.active < self.inner.capacity {
                st.active += 1;
                st.served += 1;
                None
            } else {
                if st.pending.len() >= self.inner.max_pending {
                    return Err(QueueError::Full {
                        name: self.inner.name,
                        depth: st.pending.len(),
                    });
                }
                let (tx, rx) = oneshot::channel();
                st.pending.push_back(Waiter {
                    tx,
                    enqueued: Instant::now(),
                });
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            let started = Instant::now();
            rx.await.map_err(|_| QueueError::Closed {
                name: self.inner.name,
            })?;
            let waited = started.elapsed();
            if waited > self.inner.alert_after {
                tracing::warn!(
                    queue = self.inner.name,
                    waited_secs = waited.as_secs(),
                    "queue wait exceeded alert threshold"
                );
            }
        }

        Ok(SlotPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // The queue never panics while holding this lock; treat poisoning
        // as recoverable the way the rest of the codebase does.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let mut st = match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Hand the slot to the next live waiter; skip cancelled ones.
        while let Some(waiter) = st.pending.pop_front() {
            let waited = waiter.enqueued.elapsed();
            if waiter.tx.send(()).is_ok() {
                st.served += 1;
                st.total_wait += waited;
                if waited > st.longest_wait {
                    st.longest_wait = waited;
                }
                return;
            }
        }
        st.active = st.active.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn slots_up_to_capacity_are_immediate() {
        let queue = SlotQueue::new("test", 2, 8, Duration::from_secs(120));
        let a = queue.acquire().await.unwrap();
        let b = queue.acquire().await.unwrap();
        assert_eq!(queue.active(), 2);
        assert_eq!(queue.depth(), 0);
        drop(a);
        drop(b);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn over_capacity_waits_and_resumes_fifo() {
        let queue = SlotQueue::new("test", 1, 8, Duration::from_secs(120));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = queue.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let queue_clone = queue.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let permit = queue_clone.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                drop(permit);
            }));
            // Ensure the acquires enqueue in submission order.
            while queue.depth() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn pending_cap_rejects_with_queue_full() {
        let queue = SlotQueue::new("test", 1, 2, Duration::from_secs(120));
        let _held = queue.acquire().await.unwrap();

        let q1 = queue.clone();
        let w1 = tokio::spawn(async move { q1.acquire().await });
        let q2 = queue.clone();
        let w2 = tokio::spawn(async move { q2.acquire().await });
        while queue.depth() < 2 {
            tokio::task::yield_now().await;
        }

        let err = queue.acquire().await.unwrap_err();
        assert!(matches!(err, QueueError::Full { depth: 2, .. }));

        drop(_held);
        assert!(w1.await.unwrap().is_ok());
        assert!(w2.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_slot() {
        let queue = SlotQueue::new("test", 1, 8, Duration::from_secs(120));
        let held = queue.acquire().await.unwrap();

        let q = queue.clone();
        let cancelled = tokio::spawn(async move {
            let _ = q.acquire().await;
        });
        while queue.depth() < 1 {
            tokio::task::yield_now().await;
        }
        cancelled.abort();
        let _ = cancelled.await;

        drop(held);
        // The slot must be reacquirable despite the dead waiter at the front.
        let reacquired = queue.acquire().await.unwrap();
        drop(reacquired);
    }

    #[tokio::test]
    async fn wait_durations_are_recorded() {
        let queue = SlotQueue::new("test", 1, 8, Duration::from_secs(120));
        let held = queue.acquire().await.unwrap();

        let q = queue.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        let waiter = tokio::spawn(async move {
            let _permit = q.acquire().await.unwrap();
            done2.store(1, Ordering::SeqCst);
        });
        while queue.depth() < 1 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        waiter.await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.served, 2);
        assert!(stats.longest_wait_ms >= 15);
    }
}
