//! Continuous changelog streaming.
//!
//! A raw changelog handle stops at the end of the currently available
//! records. The [`Follower`] papers over that: it drains a source,
//! closes it, waits a poll interval, and re-opens at the next index,
//! so consumers see one ordered stream for as long as they want it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{ChangelogError, ChangelogResult};
use crate::record::Record;

/// How often a drained source is re-opened to look for new records.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A positioned reader of changelog records for one MDT.
///
/// `next_record` returning `Ok(None)` means the currently available
/// records are exhausted, not that the stream is over.
pub trait RecordSource: Send + 'static {
    /// Opens (or re-opens) the source at `start_index`.
    fn open_at(&mut self, start_index: u64) -> ChangelogResult<()>;

    /// Returns the next available record, or `None` at the end of the
    /// currently available records.
    fn next_record(&mut self) -> ChangelogResult<Option<Record>>;

    /// Releases the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Streams records from a [`RecordSource`], re-opening after each
/// drain so the stream continues past the end of the log.
pub struct Follower {
    rx: tokio::sync::Mutex<mpsc::Receiver<Record>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<ChangelogResult<()>>>>,
}

impl Follower {
    /// Starts following `source` from `start_index` with the default
    /// poll interval.
    pub fn start(source: impl RecordSource, start_index: u64) -> Self {
        Self::start_with_interval(source, start_index, DEFAULT_POLL_INTERVAL)
    }

    /// Starts following `source` from `start_index`, re-polling a
    /// drained log every `poll_interval`.
    pub fn start_with_interval(
        source: impl RecordSource,
        start_index: u64,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(source, start_index, poll_interval, tx, stop_rx));
        Self {
            rx: tokio::sync::Mutex::new(rx),
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Waits for the next record.
    ///
    /// Returns `Ok(None)` once the follower has been stopped; an error
    /// from the source ends the stream and is returned here once.
    pub async fn next_record(&self) -> ChangelogResult<Option<Record>> {
        if let Some(record) = self.rx.lock().await.recv().await {
            return Ok(Some(record));
        }
        // Channel closed: the loop finished. Surface its verdict.
        let task = self.task.lock().take();
        match task {
            Some(task) => match task.await {
                Ok(Ok(())) => Ok(None),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ChangelogError::Io(std::io::Error::other(e))),
            },
            None => Ok(None),
        }
    }

    /// Signals the follower to stop. Idempotent, returns immediately;
    /// the stream ends after at most one in-flight record.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    mut source: impl RecordSource,
    start_index: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<Record>,
    mut stop_rx: watch::Receiver<bool>,
) -> ChangelogResult<()> {
    let mut next_index = start_index;
    loop {
        if *stop_rx.borrow() {
            return Ok(());
        }
        if let Err(e) = source.open_at(next_index) {
            tracing::error!(index = next_index, error = %e, "changelog open failed");
            return Err(e);
        }

        loop {
            match source.next_record() {
                Ok(Some(record)) => {
                    next_index = record.index + 1;
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => {
                            source.close();
                            return Ok(());
                        }
                        sent = tx.send(record) => {
                            if sent.is_err() {
                                source.close();
                                return Ok(());
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "changelog read failed");
                    source.close();
                    return Err(e);
                }
            }
        }
        source.close();

        tokio::select! {
            biased;
            _ = stop_rx.changed() => return Ok(()),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKind, RecordPayload};
    use std::sync::Arc;
    use tierfs_core::Fid;

    fn record(index: u64) -> Record {
        Record {
            index,
            kind: RecordKind::Create,
            flags: 0,
            time_secs: 1_700_000_000,
            target_fid: Fid::new(0x200000401, index as u32, 0),
            parent_fid: Fid::new(0x200000401, 1, 0),
            name: format!("f{index}"),
            job_id: None,
            payload: RecordPayload::Target,
        }
    }

    /// Serves scripted drains and logs every open index.
    struct ScriptedSource {
        drains: Vec<Vec<Record>>,
        current: Vec<Record>,
        opens: Arc<Mutex<Vec<u64>>>,
        fail_open: bool,
    }

    impl ScriptedSource {
        fn new(drains: Vec<Vec<Record>>) -> (Self, Arc<Mutex<Vec<u64>>>) {
            let opens = Arc::new(Mutex::new(Vec::new()));
            let source = Self {
                drains,
                current: Vec::new(),
                opens: opens.clone(),
                fail_open: false,
            };
            (source, opens)
        }
    }

    impl RecordSource for ScriptedSource {
        fn open_at(&mut self, start_index: u64) -> ChangelogResult<()> {
            self.opens.lock().push(start_index);
            if self.fail_open {
                return Err(ChangelogError::Closed);
            }
            if self.drains.is_empty() {
                self.current = Vec::new();
            } else {
                // Serve whatever the script says is available now, from
                // the requested index on.
                self.current = self
                    .drains
                    .remove(0)
                    .into_iter()
                    .filter(|r| r.index >= start_index)
                    .collect();
            }
            Ok(())
        }

        fn next_record(&mut self) -> ChangelogResult<Option<Record>> {
            if self.current.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.current.remove(0)))
            }
        }

        fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn streams_across_reopens_from_last_index() {
        let (source, opens) = ScriptedSource::new(vec![
            vec![record(1), record(2)],
            vec![record(3)],
        ]);
        let follower = Follower::start_with_interval(source, 1, Duration::from_secs(1));

        for expect in 1..=3u64 {
            let rec = follower.next_record().await.unwrap().unwrap();
            assert_eq!(rec.index, expect);
        }

        follower.stop();
        assert!(follower.next_record().await.unwrap().is_none());
        // Re-opened exactly where the previous drain left off.
        let opens = opens.lock().clone();
        assert_eq!(&opens[..2], &[1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_stream_without_records() {
        let (source, _) = ScriptedSource::new(vec![]);
        let follower = Follower::start_with_interval(source, 1, Duration::from_secs(1));
        follower.stop();
        follower.stop();
        assert!(follower.next_record().await.unwrap().is_none());
        assert!(follower.next_record().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn source_error_surfaces_once_then_ends() {
        let (mut source, _) = ScriptedSource::new(vec![]);
        source.fail_open = true;
        let follower = Follower::start_with_interval(source, 7, Duration::from_secs(1));
        assert!(matches!(
            follower.next_record().await,
            Err(ChangelogError::Closed)
        ));
        assert!(follower.next_record().await.unwrap().is_none());
    }
}
