use std::time::Duration;

use relay_header::v1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest probe window that fits a v2 header for an IPv6 origin with no
/// TLVs: 16 fixed bytes plus the 36-byte address block.
pub const MIN_PROBE_BYTES: usize = 52;

/// Errors specific to guard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardConfigError {
    #[error("max_probe_bytes must be at least {MIN_PROBE_BYTES}, got {0}")]
    ProbeTooSmall(usize),

    #[error("max_probe_bytes must be at least {} when accept_v1 is set, got {0}", v1::MAX_LEN)]
    ProbeTooSmallForV1(usize),

    #[error("handshake_timeout must be greater than zero")]
    ZeroTimeout,
}

/// Per-listener trust policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Let connections without a relay header through with their socket
    /// address as origin. When false a header is mandatory.
    #[serde(default)]
    pub allow_unverified_direct: bool,
    /// Reject headers from peers whose entry has no secret configured.
    #[serde(default)]
    pub strict_secret: bool,
    /// Upper bound on bytes buffered before a decision must be made.
    #[serde(default = "default_max_probe_bytes")]
    pub max_probe_bytes: usize,
    /// Deadline, measured from accept, for the header decision.
    #[serde(
        rename = "handshake_timeout_ms",
        with = "duration_ms",
        default = "default_handshake_timeout"
    )]
    pub handshake_timeout: Duration,
    /// Accept the text (v1) header format.
    ///
    /// Streams opening with `PROXY ` are treated as v1 headers whether or
    /// not this is set. With it off, such a stream is rejected as
    /// `version_not_allowed` (or `header_malformed` if the line does not
    /// parse), even when `allow_unverified_direct` would let a headerless
    /// connection through. Direct clients speaking a protocol that can
    /// start with those six bytes must not share a listener with relays.
    #[serde(default)]
    pub accept_v1: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            allow_unverified_direct: false,
            strict_secret: false,
            max_probe_bytes: default_max_probe_bytes(),
            handshake_timeout: default_handshake_timeout(),
            accept_v1: false,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), GuardConfigError> {
        if self.max_probe_bytes < MIN_PROBE_BYTES {
            return Err(GuardConfigError::ProbeTooSmall(self.max_probe_bytes));
        }
        if self.accept_v1 && self.max_probe_bytes < v1::MAX_LEN {
            return Err(GuardConfigError::ProbeTooSmallForV1(self.max_probe_bytes));
        }
        if self.handshake_timeout.is_zero() {
            return Err(GuardConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// 16-byte v2 prefix plus a 520-byte body, enough for an IPv6 address block
/// and a generous token TLV.
fn default_max_probe_bytes() -> usize {
    536
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
