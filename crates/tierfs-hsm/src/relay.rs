//! Unbounded buffering relay between the agent loop and consumers.
//!
//! The coordinator can hand the agent a burst of items in one batch
//! while the consumer is still busy with the previous action, so the
//! producer side must never block. Depth is unbounded on purpose: the
//! coordinator's own batching caps the number of outstanding actions,
//! so the queue tracks that bound rather than growing without limit.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct RelayState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// An unbounded FIFO connecting one producer to consumer tasks.
///
/// `push` never blocks; `recv` waits until an item arrives or the
/// relay is closed. When several consumers wait at once, each item
/// goes to exactly one of them (whichever wins the lock).
pub struct ActionRelay<T> {
    state: Mutex<RelayState<T>>,
    notify: Notify,
}

impl<T> ActionRelay<T> {
    /// Creates an empty, open relay.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RelayState {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues `item` without blocking.
    ///
    /// Items pushed after [`close`](Self::close) are dropped; the
    /// producer loop has already decided to shut down by then.
    pub fn push(&self, item: T) {
        {
            let mut state = self.state.lock();
            if state.closed {
                tracing::debug!("relay closed, dropping item");
                return;
            }
            state.queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Receives the next item in FIFO order.
    ///
    /// Returns `None` once the relay is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            // Register interest before checking state so a push between
            // the check and the await cannot be missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    // Wake another waiter in case more items remain.
                    if !state.queue.is_empty() || state.closed {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the relay. Queued items stay receivable; after the queue
    /// drains, `recv` yields `None`. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Number of queued, unconsumed items.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ActionRelay<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_across_bursts() {
        let relay = ActionRelay::new();
        // Batches of 2, 1, 3 pushed at arbitrary rate.
        for v in [1, 2] {
            relay.push(v);
        }
        relay.push(3);
        for v in [4, 5, 6] {
            relay.push(v);
        }

        let mut got = Vec::new();
        for _ in 0..6 {
            got.push(relay.recv().await.unwrap());
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn recv_waits_for_push() {
        let relay = Arc::new(ActionRelay::new());
        let consumer = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay.push(42u32);
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn close_flushes_then_ends_stream() {
        let relay = ActionRelay::new();
        relay.push(1u32);
        relay.push(2u32);
        relay.close();

        assert_eq!(relay.recv().await, Some(1));
        assert_eq!(relay.recv().await, Some(2));
        assert_eq!(relay.recv().await, None);
        assert_eq!(relay.recv().await, None);
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumer() {
        let relay = Arc::new(ActionRelay::<u32>::new());
        let consumer = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay.close();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_after_close_is_dropped() {
        let relay = ActionRelay::new();
        relay.close();
        relay.push(9u32);
        assert_eq!(relay.recv().await, None);
        assert!(relay.is_empty());
    }

    #[tokio::test]
    async fn concurrent_consumers_share_without_duplicates() {
        let relay = Arc::new(ActionRelay::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let relay = relay.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = relay.recv().await {
                    got.push(v);
                }
                got
            }));
        }
        for v in 0..100u32 {
            relay.push(v);
        }
        relay.close();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
