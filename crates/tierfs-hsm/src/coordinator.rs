//! Coordinator connection and batch receipt.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use tierfs_core::MountPoint;
use tierfs_sys::ActionBatch;

use crate::action::ActionItem;
use crate::error::HsmResult;
use crate::transport::{Copytool, KernelCopytool};

/// A registered connection to the filesystem's HSM coordinator.
///
/// Cloning is cheap and shares the one underlying registration; the
/// registration is torn down by [`close`](Self::close) or when the
/// last clone drops.
#[derive(Clone)]
pub struct Coordinator {
    transport: Arc<dyn Copytool>,
}

impl Coordinator {
    /// Registers with the coordinator serving `mount`.
    ///
    /// `non_blocking` keeps the event descriptor pollable, which the
    /// [`Agent`](crate::agent::Agent) loop requires; a blocking
    /// registration only supports [`try_recv`](Self::try_recv) driven
    /// by the caller's own readiness handling.
    pub fn connect(mount: &MountPoint, non_blocking: bool) -> HsmResult<Self> {
        let transport = KernelCopytool::register(mount, non_blocking)?;
        tracing::info!(mount = %mount, "registered with coordinator");
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Wraps an existing transport. This is how tests and backend
    /// development run against [`crate::mock::MockCopytool`].
    pub fn with_transport(transport: Arc<dyn Copytool>) -> Self {
        Self { transport }
    }

    /// Waits for the next batch and returns its items in coordinator
    /// order.
    pub async fn recv(&self) -> HsmResult<Vec<ActionItem>> {
        let batch = self.transport.recv_batch().await?;
        Ok(self.items(batch))
    }

    /// Non-blocking receive;
    /// [`HsmError::WouldBlock`](crate::error::HsmError::WouldBlock)
    /// when nothing is pending.
    pub fn try_recv(&self) -> HsmResult<Vec<ActionItem>> {
        let batch = self.transport.try_recv()?;
        Ok(self.items(batch))
    }

    fn items(&self, batch: ActionBatch) -> Vec<ActionItem> {
        tracing::debug!(
            compound_id = batch.compound_id,
            items = batch.items.len(),
            fs = %batch.fs_name,
            "action batch received"
        );
        batch
            .items
            .into_iter()
            .map(|record| ActionItem::new(Arc::downgrade(&self.transport), record))
            .collect()
    }

    /// The readable-event descriptor of a non-blocking registration.
    pub fn fd(&self) -> Option<RawFd> {
        self.transport.raw_fd()
    }

    /// Unregisters from the coordinator. Idempotent; items already
    /// handed out fail with `Closed` from here on.
    pub fn close(&self) {
        self.transport.close();
    }

    /// True once the registration has been torn down.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HsmError;
    use crate::mock::{mock_record, MockCopytool};
    use tierfs_core::{ActionKind, Fid};

    fn fid(oid: u32) -> Fid {
        Fid::new(0x200000401, oid, 0)
    }

    #[tokio::test]
    async fn recv_preserves_batch_order() {
        let mock = Arc::new(MockCopytool::new());
        mock.push_batch(vec![
            mock_record(ActionKind::Archive, fid(1), 1),
            mock_record(ActionKind::Restore, fid(2), 2),
        ]);
        let coord = Coordinator::with_transport(mock);

        let items = coord.recv().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].cookie(), 1);
        assert_eq!(items[0].action(), ActionKind::Archive);
        assert_eq!(items[1].cookie(), 2);
        assert_eq!(items[1].action(), ActionKind::Restore);
    }

    #[test]
    fn try_recv_reports_would_block() {
        let coord = Coordinator::with_transport(Arc::new(MockCopytool::new()));
        assert!(matches!(coord.try_recv(), Err(HsmError::WouldBlock)));
    }

    #[tokio::test]
    async fn recv_after_close_is_closed() {
        let mock = Arc::new(MockCopytool::new());
        mock.push_batch(vec![mock_record(ActionKind::Archive, fid(1), 1)]);
        let coord = Coordinator::with_transport(mock);
        coord.close();
        coord.close();
        assert!(coord.is_closed());
        assert!(matches!(coord.recv().await, Err(HsmError::Closed)));
        assert!(matches!(coord.try_recv(), Err(HsmError::Closed)));
    }

    #[tokio::test]
    async fn items_from_dropped_coordinator_fail_closed() {
        let mock = Arc::new(MockCopytool::new());
        mock.push_batch(vec![mock_record(ActionKind::Archive, fid(1), 1)]);
        let coord = Coordinator::with_transport(mock.clone());
        let mut items = coord.recv().await.unwrap();
        let item = items.pop().unwrap();
        drop(coord);
        drop(mock);
        assert!(matches!(item.begin(0, false), Err(HsmError::Closed)));
    }
}
