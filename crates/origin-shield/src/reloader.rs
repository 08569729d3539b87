use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use peer_registry::{loader::load_peers, RegistryHandle};

/// What prompted a reload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Hangup,
    FileChanged,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Hangup => "sighup",
            Trigger::FileChanged => "file_changed",
        }
    }
}

/// Re-reads the peers file into a [`RegistryHandle`] on SIGHUP and, when
/// configured, whenever the file's modification time changes.
///
/// A failed reload leaves the running registry untouched.
pub struct Reloader {
    path: PathBuf,
    registry: RegistryHandle,
    audit: AuditSink,
    poll_interval: Option<Duration>,
    last_modified: Option<SystemTime>,
}

impl Reloader {
    pub fn new(path: impl Into<PathBuf>, registry: RegistryHandle, audit: AuditSink) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            registry,
            audit,
            poll_interval: None,
            last_modified,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Option<Duration>) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Load the peers file and swap it in. Returns the new generation.
    pub fn reload_now(&mut self, trigger: Trigger) -> Result<u64> {
        self.last_modified = modified(&self.path);

        let result = load_peers(&self.path).and_then(|file| {
            let peers = file.peers.len();
            let generation = self.registry.reload(file.peers)?;
            Ok((generation, peers))
        });

        let source = AuditSource::new("reloader");

        match result {
            Ok((generation, peers)) => {
                info!(
                    path = %self.path.display(),
                    trigger = trigger.as_str(),
                    generation,
                    peers,
                    "peers file reloaded"
                );
                self.audit.log(AuditEntry::new(
                    AuditEventType::RegistryReloaded,
                    source,
                    serde_json::json!({
                        "peers_file": self.path.display().to_string(),
                        "trigger": trigger.as_str(),
                        "generation": generation,
                        "peers": peers,
                    }),
                ));
                Ok(generation)
            }
            Err(err) => {
                let kept = self.registry.generation();
                warn!(
                    path = %self.path.display(),
                    trigger = trigger.as_str(),
                    generation = kept,
                    err = %format!("{err:#}"),
                    "peers file rejected; keeping current registry"
                );
                self.audit.log(AuditEntry::new(
                    AuditEventType::RegistryReloadRejected,
                    source,
                    serde_json::json!({
                        "peers_file": self.path.display().to_string(),
                        "trigger": trigger.as_str(),
                        "generation": kept,
                        "error": format!("{err:#}"),
                    }),
                ));
                Err(err)
            }
        }
    }

    /// Reload if the file's modification time moved since the last attempt.
    /// Returns whether a reload was attempted.
    pub fn poll_once(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        let _ = self.reload_now(Trigger::FileChanged);
        true
    }

    /// Serve reload triggers until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut hangup = hangup_signal();
        let mut ticker = self.poll_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(
            path = %self.path.display(),
            poll_interval_secs = self.poll_interval.map(|d| d.as_secs()),
            "peers reloader started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("peers reloader stopping");
                    return;
                }
                _ = next_hangup(&mut hangup) => {
                    let _ = self.reload_now(Trigger::Hangup);
                }
                _ = next_tick(&mut ticker) => {
                    self.poll_once();
                }
            }
        }
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
type Hangup = Option<tokio::signal::unix::Signal>;

#[cfg(not(unix))]
type Hangup = ();

#[cfg(unix)]
fn hangup_signal() -> Hangup {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(sig) => Some(sig),
        Err(err) => {
            warn!(%err, "failed to register SIGHUP handler; reload on signal disabled");
            None
        }
    }
}

#[cfg(not(unix))]
fn hangup_signal() -> Hangup {}

#[cfg(unix)]
async fn next_hangup(hangup: &mut Hangup) {
    if let Some(sig) = hangup {
        if sig.recv().await.is_some() {
            return;
        }
        *hangup = None;
    }
    std::future::pending().await
}

#[cfg(not(unix))]
async fn next_hangup(_hangup: &mut Hangup) {
    std::future::pending().await
}
