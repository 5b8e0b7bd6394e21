//! Background receive loop feeding action consumers.
//!
//! The agent owns the only task that reads from the coordinator. It
//! multiplexes batch arrival against a stop signal, fans each batch
//! out item by item into an [`ActionRelay`], and on any exit path
//! closes both the registration and the relay so consumers observe a
//! clean end of stream instead of hanging.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::action::ActionItem;
use crate::coordinator::Coordinator;
use crate::error::HsmError;
use crate::relay::ActionRelay;

/// Drives the coordinator receive loop on a background task.
pub struct Agent {
    relay: Arc<ActionRelay<ActionItem>>,
    coordinator: Coordinator,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Starts the receive loop over `coordinator`.
    ///
    /// The coordinator must have been registered non-blocking; a
    /// blocking registration would pin the loop's task in the kernel.
    pub fn start(coordinator: Coordinator) -> Self {
        let relay = Arc::new(ActionRelay::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(coordinator.clone(), relay.clone(), stop_rx));

        Self {
            relay,
            coordinator,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Waits for the next action.
    ///
    /// Items come out in the order the coordinator sent them,
    /// regardless of batch boundaries. Returns `None` once the agent
    /// has stopped and every buffered item has been consumed.
    pub async fn next_action(&self) -> Option<ActionItem> {
        self.relay.recv().await
    }

    /// Number of received actions not yet handed to a consumer.
    pub fn backlog(&self) -> usize {
        self.relay.len()
    }

    /// The connection the loop is reading from.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Signals the loop to stop. Idempotent, callable from any
    /// context; the loop unregisters and closes the relay on its way
    /// out. Use [`join`](Self::join) to wait for that to finish.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Waits for the receive loop to finish shutting down.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "agent task failed");
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    coordinator: Coordinator,
    relay: Arc<ActionRelay<ActionItem>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                tracing::debug!("agent stop requested");
                break;
            }
            result = coordinator.recv() => match result {
                Ok(items) => {
                    for item in items {
                        relay.push(item);
                    }
                }
                Err(HsmError::Closed) => {
                    tracing::debug!("coordinator closed, agent stopping");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "agent receive failed");
                    break;
                }
            },
        }
    }
    coordinator.close();
    relay.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_record, MockCopytool};
    use crate::transport::Copytool;
    use tierfs_core::{ActionKind, Fid};

    fn fid(oid: u32) -> Fid {
        Fid::new(0x200000401, oid, 0)
    }

    fn batch(cookies: &[u64]) -> Vec<tierfs_sys::ActionRecord> {
        cookies
            .iter()
            .map(|&c| mock_record(ActionKind::Archive, fid(c as u32), c))
            .collect()
    }

    #[tokio::test]
    async fn items_flow_in_order_across_batches() {
        let mock = Arc::new(MockCopytool::new());
        let agent = Agent::start(Coordinator::with_transport(mock.clone()));

        // Bursts of 2, 1, 3 while the consumer keeps up or lags.
        mock.push_batch(batch(&[1, 2]));
        mock.push_batch(batch(&[3]));
        mock.push_batch(batch(&[4, 5, 6]));

        let mut cookies = Vec::new();
        for _ in 0..6 {
            cookies.push(agent.next_action().await.unwrap().cookie());
        }
        assert_eq!(cookies, vec![1, 2, 3, 4, 5, 6]);

        agent.stop();
        agent.join().await;
    }

    #[tokio::test]
    async fn stop_ends_stream_promptly() {
        let mock = Arc::new(MockCopytool::new());
        let agent = Agent::start(Coordinator::with_transport(mock));

        agent.stop();
        agent.stop();
        agent.join().await;
        agent.join().await;

        assert!(agent.next_action().await.is_none());
        assert!(agent.coordinator().is_closed());
    }

    #[tokio::test]
    async fn buffered_items_survive_stop() {
        let mock = Arc::new(MockCopytool::new());
        let agent = Agent::start(Coordinator::with_transport(mock.clone()));

        mock.push_batch(batch(&[7, 8]));
        // Wait for the loop to buffer the batch before stopping.
        let first = agent.next_action().await.unwrap();
        assert_eq!(first.cookie(), 7);

        agent.stop();
        agent.join().await;

        assert_eq!(agent.next_action().await.unwrap().cookie(), 8);
        assert!(agent.next_action().await.is_none());
    }

    #[tokio::test]
    async fn transport_close_stops_the_loop() {
        let mock = Arc::new(MockCopytool::new());
        let agent = Agent::start(Coordinator::with_transport(mock.clone()));

        mock.close();
        agent.join().await;
        assert!(agent.next_action().await.is_none());
    }
}
