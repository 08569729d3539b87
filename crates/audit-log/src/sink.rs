use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::entry::{AuditEntry, HandshakeEvent};
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// A cheap, cloneable handle used to submit [`AuditEntry`] values.
///
/// Submission never waits: connection tasks call [`record`](Self::record)
/// on the hot path, so a full channel drops the entry and bumps a counter
/// instead of applying backpressure.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("enabled", &self.is_enabled())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl AuditSink {
    /// Spawn the background writer task for a JSON-lines file and return a
    /// `(sink, join_handle)` pair.
    ///
    /// The background task will:
    ///
    /// * Write each entry as a JSON line via [`AuditWriter`].
    /// * Flush periodically (every ~1 second of channel inactivity).
    /// * Flush once more when the last `AuditSink` clone is dropped and the
    ///   channel closes, then exit cleanly.
    ///
    /// I/O errors are logged via `tracing::error` and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let writer = AuditWriter::open(path).await?;
        Ok(Self::spawn(writer))
    }

    /// Same as [`start`](Self::start) for an arbitrary async writer.
    pub fn spawn<W>(mut writer: AuditWriter<W>) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        (Self::from_sender(tx), handle)
    }

    /// An in-memory sink; entries are delivered to the returned receiver.
    pub fn memory(capacity: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn from_sender(tx: mpsc::Sender<AuditEntry>) -> Self {
        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Entries discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record the outcome of one handshake.
    pub fn record(&self, event: HandshakeEvent) {
        self.log(AuditEntry::from(event));
    }

    /// Submit an entry without waiting.
    pub fn log(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = ?entry.event_type,
                    "audit channel full; entry dropped"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_type = ?entry.event_type,
                    "audit sink closed; entry dropped"
                );
            }
        }
    }
}

/// Core loop executed inside the background task.
///
/// Reads entries from the channel and writes them out. When the channel has
/// no entries ready for [`FLUSH_INTERVAL_SECS`] the writer is flushed. On
/// channel close a final flush is performed.
async fn run_writer_loop<W>(writer: &mut AuditWriter<W>, mut rx: mpsc::Receiver<AuditEntry>)
where
    W: AsyncWrite + Unpin,
{
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write audit entry");
                } else {
                    dirty = true;
                }
            }
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!("audit writer background task shutting down");
                return;
            }
            Err(_) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic audit log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditEventType, AuditSource, HandshakeOutcome};

    fn trusted_event() -> HandshakeEvent {
        HandshakeEvent {
            connection_id: uuid::Uuid::new_v4(),
            peer_address: "10.0.0.5:40000".parse().unwrap(),
            outcome: HandshakeOutcome::Trusted,
            reason_code: None,
            effective_origin: Some("203.0.113.9:51000".parse().unwrap()),
            label: Some("lb".into()),
            bytes_consumed: 28,
            registry_generation: 1,
        }
    }

    #[tokio::test]
    async fn memory_sink_delivers_records() {
        let (sink, mut rx) = AuditSink::memory(8);
        sink.record(trusted_event());

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.event_type, AuditEventType::HandshakeTrusted);
        assert_eq!(entry.handshake.unwrap().label.as_deref(), Some("lb"));
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (sink, _rx) = AuditSink::memory(1);
        sink.record(trusted_event());
        sink.record(trusted_event());
        sink.record(trusted_event());
        assert_eq!(sink.dropped(), 2);
    }

    #[tokio::test]
    async fn closed_channel_counts_drops() {
        let (sink, rx) = AuditSink::memory(4);
        drop(rx);
        sink.record(trusted_event());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn disabled_sink_ignores_everything() {
        let sink = AuditSink::disabled();
        assert!(!sink.is_enabled());
        sink.record(trusted_event());
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn file_sink_flushes_on_close() {
        let path = std::env::temp_dir().join(format!("audit-sink-{}.jsonl", uuid::Uuid::new_v4()));
        let (sink, handle) = AuditSink::start(&path).await.unwrap();

        sink.record(trusted_event());
        sink.log(AuditEntry::new(
            AuditEventType::RegistryReloaded,
            AuditSource::new("test"),
            serde_json::json!({"generation": 2}),
        ));
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let kinds: Vec<String> = contents
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
            .map(|v| v["event_type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["handshake_trusted", "registry_reloaded"]);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
