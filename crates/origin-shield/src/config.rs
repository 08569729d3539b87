use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use handshake::{ShieldConfig, UpstreamHeader};
use relay_header::ProtocolVersion;
use serde::Deserialize;
use spoof_guard::GuardConfig;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default = "default_peers_file")]
    pub peers_file: PathBuf,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            guard: GuardConfig::default(),
            upstream: UpstreamConfig::default(),
            peers_file: default_peers_file(),
            reload: ReloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_upstream")]
    pub upstream_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            upstream_addr: default_upstream(),
        }
    }
}

/// Header this hop writes toward its upstream when it is itself a relay.
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub send_header: bool,
    #[serde(default = "default_header_version")]
    pub header_version: ProtocolVersion,
    #[serde(default)]
    pub token: Option<String>,
    /// Hex form of `token` for binary secrets.
    #[serde(default)]
    pub token_hex: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            send_header: false,
            header_version: default_header_version(),
            token: None,
            token_hex: None,
        }
    }
}

impl UpstreamConfig {
    fn token_bytes(&self) -> anyhow::Result<Option<Bytes>> {
        let token = match (&self.token, &self.token_hex) {
            (Some(_), Some(_)) => bail!("set only one of upstream.token and upstream.token_hex"),
            (Some(text), None) => text.as_bytes().to_vec(),
            (None, Some(encoded)) => {
                hex::decode(encoded.trim()).context("upstream.token_hex is not valid hex")?
            }
            (None, None) => return Ok(None),
        };
        if token.is_empty() {
            bail!("upstream.token must not be empty");
        }
        Ok(Some(Bytes::from(token)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadConfig {
    /// Seconds between peers-file modification checks. 0 disables polling;
    /// SIGHUP still triggers a reload.
    #[serde(default)]
    pub poll_interval_secs: u64,
}

impl ReloadConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

impl Config {
    /// Resolve the listener settings, checking addresses and the upstream
    /// header combination.
    pub fn shield_config(&self) -> anyhow::Result<ShieldConfig> {
        let listen_addr: SocketAddr = self
            .network
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.network.listen_addr))?;
        let upstream_addr: SocketAddr = self
            .network
            .upstream_addr
            .parse()
            .with_context(|| format!("invalid upstream address '{}'", self.network.upstream_addr))?;

        let upstream_header = if self.upstream.send_header {
            let token = self.upstream.token_bytes()?;
            if token.is_some() && self.upstream.header_version == ProtocolVersion::V1 {
                bail!("upstream.token requires header_version v2");
            }
            Some(UpstreamHeader {
                version: self.upstream.header_version,
                token,
            })
        } else {
            None
        };

        Ok(ShieldConfig {
            listen_addr,
            upstream_addr,
            upstream_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_peers_file() -> PathBuf {
    PathBuf::from("peers.yaml")
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_upstream() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_header_version() -> ProtocolVersion {
    ProtocolVersion::V2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the default configuration and a warning.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    parse(&contents).with_context(|| format!("failed to parse config file {}", path.display()))
}

fn parse(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yml::from_str(contents)?;
    config.guard.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.network.listen_addr, "0.0.0.0:8443");
        assert_eq!(cfg.guard, GuardConfig::default());
        assert_eq!(cfg.peers_file, PathBuf::from("peers.yaml"));
        assert!(cfg.reload.poll_interval().is_none());
        assert!(cfg.shield_config().unwrap().upstream_header.is_none());
    }

    #[test]
    fn full_document() {
        let yaml = r#"
network:
  listen_addr: "127.0.0.1:9443"
  upstream_addr: "127.0.0.1:9080"
guard:
  allow_unverified_direct: true
  strict_secret: true
  handshake_timeout_ms: 250
  accept_v1: true
upstream:
  send_header: true
  header_version: v2
  token: "hop-2"
peers_file: "/etc/origin-shield/peers.yaml"
reload:
  poll_interval_secs: 30
logging:
  level: debug
  audit_log_path: "/var/log/origin-shield/audit.jsonl"
"#;
        let cfg = parse(yaml).unwrap();
        assert!(cfg.guard.allow_unverified_direct);
        assert!(cfg.guard.strict_secret);
        assert!(cfg.guard.accept_v1);
        assert_eq!(cfg.guard.handshake_timeout, Duration::from_millis(250));
        assert_eq!(cfg.reload.poll_interval(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.logging.level, "debug");

        let shield = cfg.shield_config().unwrap();
        assert_eq!(shield.listen_addr, "127.0.0.1:9443".parse().unwrap());
        let header = shield.upstream_header.unwrap();
        assert_eq!(header.version, ProtocolVersion::V2);
        assert_eq!(header.token.as_deref(), Some(&b"hop-2"[..]));
    }

    #[test]
    fn invalid_guard_settings_are_rejected() {
        let err = parse("guard:\n  max_probe_bytes: 4\n").unwrap_err();
        assert!(err.to_string().contains("max_probe_bytes"));
    }

    #[test]
    fn v1_upstream_cannot_carry_token() {
        let cfg = parse("upstream:\n  send_header: true\n  header_version: v1\n  token: t\n").unwrap();
        assert!(cfg.shield_config().is_err());
    }

    #[test]
    fn upstream_token_accepts_hex() {
        let cfg = parse("upstream:\n  send_header: true\n  token_hex: \"00ff7f\"\n").unwrap();
        let header = cfg.shield_config().unwrap().upstream_header.unwrap();
        assert_eq!(header.token.as_deref(), Some(&[0x00, 0xff, 0x7f][..]));

        let both = parse("upstream:\n  send_header: true\n  token: a\n  token_hex: \"61\"\n").unwrap();
        assert!(both.shield_config().is_err());

        let bad = parse("upstream:\n  send_header: true\n  token_hex: \"xyz\"\n").unwrap();
        let err = bad.shield_config().unwrap_err();
        assert!(format!("{err:#}").contains("token_hex"));

        let empty = parse("upstream:\n  send_header: true\n  token: \"\"\n").unwrap();
        assert!(empty.shield_config().is_err());
    }

    #[test]
    fn bad_address_is_reported() {
        let cfg = parse("network:\n  listen_addr: \"nowhere\"\n").unwrap();
        let err = cfg.shield_config().unwrap_err();
        assert!(format!("{err:#}").contains("invalid listen address"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("origin-shield-{}.yaml", uuid::Uuid::new_v4()));
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.logging.level, "info");
    }
}
