use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use bytes::Bytes;
use relay_header::{encode, ProtocolVersion, RelayHeader};
use spoof_guard::RejectReason;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::adapter::stream::intercept;
use crate::context::{ConnectionContext, TrustDecision};
use crate::interceptor::Interceptor;

/// Header this hop writes toward its own upstream.
#[derive(Debug, Clone)]
pub struct UpstreamHeader {
    pub version: ProtocolVersion,
    /// Token presented to the next hop, which must list this host.
    pub token: Option<Bytes>,
}

/// Configuration for the forwarding listener.
#[derive(Debug, Clone)]
pub struct ShieldConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Where accepted connections are forwarded.
    pub upstream_addr: SocketAddr,
    /// When set, every forwarded connection starts with a freshly encoded
    /// header carrying the effective origin. The inbound header is never
    /// forwarded as-is.
    pub upstream_header: Option<UpstreamHeader>,
}

/// Connection counters, shared across connection tasks.
#[derive(Debug, Default)]
pub struct ShieldStats {
    accepted: AtomicU64,
    trusted: AtomicU64,
    passthrough: AtomicU64,
    rejected: [AtomicU64; RejectReason::ALL.len()],
    upstream_failures: AtomicU64,
}

impl ShieldStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn trusted(&self) -> u64 {
        self.trusted.load(Ordering::Relaxed)
    }

    pub fn passthrough(&self) -> u64 {
        self.passthrough.load(Ordering::Relaxed)
    }

    pub fn rejected(&self, reason: RejectReason) -> u64 {
        self.rejected[slot(reason)].load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn upstream_failures(&self) -> u64 {
        self.upstream_failures.load(Ordering::Relaxed)
    }

    /// Emit the counters as one structured log line.
    pub fn log_summary(&self) {
        let by_reason: Vec<String> = RejectReason::ALL
            .iter()
            .map(|r| (r, self.rejected(*r)))
            .filter(|(_, n)| *n > 0)
            .map(|(r, n)| format!("{}={n}", r.code()))
            .collect();
        tracing::info!(
            accepted = self.accepted(),
            trusted = self.trusted(),
            passthrough = self.passthrough(),
            rejected = self.total_rejected(),
            rejected_by_reason = %by_reason.join(","),
            upstream_failures = self.upstream_failures(),
            "connection statistics"
        );
    }

    fn record_allowed(&self, ctx: &ConnectionContext) {
        let counter = match ctx.trust_decision {
            TrustDecision::Trusted => &self.trusted,
            _ => &self.passthrough,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self, reason: RejectReason) {
        self.rejected[slot(reason)].fetch_add(1, Ordering::Relaxed);
    }
}

fn slot(reason: RejectReason) -> usize {
    RejectReason::ALL
        .iter()
        .position(|r| *r == reason)
        .unwrap_or_default()
}

/// The edge listener: accepts TCP, runs the handshake, then relays bytes to
/// the upstream.
pub struct Shield {
    config: Arc<ShieldConfig>,
    interceptor: Arc<Interceptor>,
    audit: AuditSink,
    stats: Arc<ShieldStats>,
}

impl Shield {
    pub fn new(config: ShieldConfig, interceptor: Interceptor) -> Self {
        Self {
            config: Arc::new(config),
            interceptor: Arc::new(interceptor),
            audit: AuditSink::disabled(),
            stats: Arc::new(ShieldStats::default()),
        }
    }

    /// Sink for connection-level events (upstream failures). Handshake
    /// decisions are recorded by the interceptor's own sink.
    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = audit;
        self
    }

    pub fn stats(&self) -> Arc<ShieldStats> {
        Arc::clone(&self.stats)
    }

    /// Bind `listen_addr` and serve until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        self.serve(listener, shutdown).await
    }

    /// Accept on an already-bound listener until `shutdown` resolves. Each
    /// connection is handled in its own Tokio task.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(
            addr = %local,
            upstream = %self.config.upstream_addr,
            "origin-shield listening"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(addr = %local, "listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    self.stats.accepted.fetch_add(1, Ordering::Relaxed);

                    let config = Arc::clone(&self.config);
                    let interceptor = Arc::clone(&self.interceptor);
                    let stats = Arc::clone(&self.stats);
                    let audit = self.audit.clone();

                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_connection(stream, peer, config, interceptor, stats, audit).await
                        {
                            tracing::debug!(%peer, err = %format!("{err:#}"), "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// Handle one connection from accept through relay and teardown.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ShieldConfig>,
    interceptor: Arc<Interceptor>,
    stats: Arc<ShieldStats>,
    audit: AuditSink,
) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);

    let accepted = match intercept(&interceptor, stream, peer).await {
        Ok(accepted) => accepted,
        Err(rejection) => {
            stats.record_rejected(rejection.reason);
            return Ok(());
        }
    };
    stats.record_allowed(&accepted.context);
    let ctx = accepted.context;
    let mut client = accepted.stream;

    let mut upstream = match TcpStream::connect(config.upstream_addr).await {
        Ok(upstream) => upstream,
        Err(err) => {
            stats.upstream_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                connection_id = %ctx.id,
                upstream = %config.upstream_addr,
                %err,
                "upstream connect failed"
            );
            let mut source = AuditSource::new("listener");
            source.remote_addr = Some(ctx.effective_origin_address.to_string());
            source.session_id = Some(ctx.id.to_string());
            audit.log(AuditEntry::new(
                AuditEventType::UpstreamConnectFailed,
                source,
                serde_json::json!({
                    "upstream": config.upstream_addr.to_string(),
                    "error": err.to_string(),
                }),
            ));
            return Err(err).context("upstream connect failed");
        }
    };
    let _ = upstream.set_nodelay(true);

    if let Some(rewrap) = &config.upstream_header {
        let mut header = RelayHeader::new(rewrap.version, ctx.effective_origin_address);
        header.auth_token = rewrap.token.clone();
        let wire = encode(&header).context("encoding upstream header")?;
        upstream
            .write_all(&wire)
            .await
            .context("writing upstream header")?;
    }

    tracing::debug!(
        connection_id = %ctx.id,
        origin = %ctx.effective_origin_address,
        upstream = %config.upstream_addr,
        "relaying"
    );

    let (to_upstream, to_client) = tokio::io::copy_bidirectional(&mut client, &mut upstream)
        .await
        .context("relay failed")?;

    tracing::info!(
        connection_id = %ctx.id,
        peer = %ctx.raw_peer_address,
        origin = %ctx.effective_origin_address,
        to_upstream,
        to_client,
        "connection closed"
    );
    Ok(())
}
