mod cli;
mod config;
mod reloader;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use handshake::{Interceptor, Shield};
use peer_registry::{loader::load_peers, RegistryHandle};

use crate::cli::Cli;
use crate::reloader::Reloader;

const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Init tracing before loading config so a missing file is reported.
    //    RUST_LOG wins over the configured level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level_hint(&cli)));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    // 3. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref peers) = cli.peers {
        cfg.peers_file = peers.clone();
    }
    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    if let Some(ref upstream) = cli.upstream {
        cfg.network.upstream_addr = upstream.clone();
    }

    let shield_config = cfg.shield_config()?;

    // 4. Load the trusted peers. A bad file at startup is fatal.
    let peers = load_peers(&cfg.peers_file).context("failed to load peers file")?;
    let registry = RegistryHandle::from_config(peers.peers)
        .context("failed to build trusted-peer registry")?;

    if cli.check {
        info!(
            config_file = %cli.config.display(),
            peers_file = %cfg.peers_file.display(),
            peers = registry.snapshot().len(),
            listen = %shield_config.listen_addr,
            upstream = %shield_config.upstream_addr,
            "configuration ok"
        );
        return Ok(());
    }

    info!(
        config_file = %cli.config.display(),
        peers_file = %cfg.peers_file.display(),
        listen = %shield_config.listen_addr,
        upstream = %shield_config.upstream_addr,
        allow_unverified_direct = cfg.guard.allow_unverified_direct,
        strict_secret = cfg.guard.strict_secret,
        accept_v1 = cfg.guard.accept_v1,
        "origin-shield starting"
    );

    // 5. Start audit logger.
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path)
        .await
        .context("failed to start audit logger")?;

    audit.log(AuditEntry::new(
        AuditEventType::ProcessStarted,
        AuditSource::new("origin-shield"),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config_file": cli.config.display().to_string(),
            "peers_file": cfg.peers_file.display().to_string(),
            "registry_generation": registry.generation(),
        }),
    ));

    // 6. Set up shutdown signal (ctrl_c + SIGTERM).
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx_signal.send(());
    });

    // 7. Peers reloader.
    let reloader = Reloader::new(&cfg.peers_file, registry.clone(), audit.clone())
        .with_poll_interval(cfg.reload.poll_interval());
    let reloader_task = tokio::spawn(reloader.run(shutdown_tx.subscribe()));

    // 8. Interceptor and listener.
    let interceptor = Interceptor::new(registry, cfg.guard.clone())
        .context("invalid guard configuration")?
        .with_audit(audit.clone());
    let shield = Shield::new(shield_config, interceptor).with_audit(audit.clone());
    let stats = shield.stats();

    let mut shutdown_rx = shutdown_tx.subscribe();
    let result = shield
        .run(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;

    // The listener may have exited on its own (bind failure).
    let _ = shutdown_tx.send(());
    let _ = reloader_task.await;

    // 9. Log shutdown.
    info!("origin-shield shutting down");
    stats.log_summary();
    if audit.dropped() > 0 {
        warn!(dropped = audit.dropped(), "audit entries were dropped");
    }

    audit.log(AuditEntry::new(
        AuditEventType::ProcessStopped,
        AuditSource::new("origin-shield"),
        serde_json::json!({
            "result": format!("{:?}", result),
            "accepted": stats.accepted(),
            "trusted": stats.trusted(),
            "passthrough": stats.passthrough(),
            "rejected": stats.total_rejected(),
        }),
    ));

    // Closing every sink clone lets the writer flush and exit. Connections
    // still relaying hold their own clones, so the wait is bounded.
    drop(shield);
    drop(audit);
    if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_handle).await.is_err() {
        warn!("audit writer did not finish before exit");
    }

    result
}

/// The level used before the config file is read, when `RUST_LOG` is unset.
/// Peeks at the config so `logging.level` applies from the first line.
fn log_level_hint(cli: &Cli) -> String {
    std::fs::read_to_string(&cli.config)
        .ok()
        .and_then(|s| serde_yml::from_str::<serde_yml::Value>(&s).ok())
        .and_then(|v| v.get("logging")?.get("level")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "info".to_string())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }
}
