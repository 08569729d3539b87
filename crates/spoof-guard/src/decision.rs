use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Why a connection was refused during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A header signature matched but the header is invalid or truncated.
    HeaderMalformed,
    /// A header arrived from a socket address outside the registry.
    PeerNotTrusted,
    /// The relay's token was missing or wrong.
    SecretMismatch,
    /// The probe buffer filled up before a decision could be made.
    ProbeLimitExceeded,
    /// The decision deadline passed.
    HandshakeTimeout,
    /// The peer went away before the handshake completed.
    UnexpectedDisconnect,
    /// No header was sent and direct connections are not allowed.
    HeaderRequired,
    /// The header uses a format this listener does not accept.
    VersionNotAllowed,
}

impl RejectReason {
    pub const ALL: [RejectReason; 8] = [
        RejectReason::HeaderMalformed,
        RejectReason::PeerNotTrusted,
        RejectReason::SecretMismatch,
        RejectReason::ProbeLimitExceeded,
        RejectReason::HandshakeTimeout,
        RejectReason::UnexpectedDisconnect,
        RejectReason::HeaderRequired,
        RejectReason::VersionNotAllowed,
    ];

    /// Stable identifier used in logs and audit records.
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::HeaderMalformed => "header_malformed",
            RejectReason::PeerNotTrusted => "peer_not_trusted",
            RejectReason::SecretMismatch => "secret_mismatch",
            RejectReason::ProbeLimitExceeded => "probe_limit_exceeded",
            RejectReason::HandshakeTimeout => "handshake_timeout",
            RejectReason::UnexpectedDisconnect => "unexpected_disconnect",
            RejectReason::HeaderRequired => "header_required",
            RejectReason::VersionNotAllowed => "version_not_allowed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of checking one connection's header against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Rewrite the connection's origin to `origin`. `label` names the
    /// registry entry that vouched for it.
    Trust { origin: SocketAddr, label: String },
    /// Close the connection without forwarding anything.
    Reject(RejectReason),
    /// Continue with the socket address as origin.
    PassThrough,
}

impl Decision {
    pub fn is_trust(&self) -> bool {
        matches!(self, Decision::Trust { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Decision::Reject(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique_snake_case() {
        let codes: HashSet<_> = RejectReason::ALL.iter().map(|r| r.code()).collect();
        assert_eq!(codes.len(), RejectReason::ALL.len());
        for code in codes {
            assert!(code.bytes().all(|b| b.is_ascii_lowercase() || b == b'_'));
        }
    }

    #[test]
    fn serde_matches_code() {
        for reason in RejectReason::ALL {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.code()));
        }
    }

    #[test]
    fn decision_helpers() {
        let trust = Decision::Trust {
            origin: "203.0.113.9:51000".parse().unwrap(),
            label: "lb".into(),
        };
        assert!(trust.is_trust());
        assert_eq!(trust.reject_reason(), None);

        let reject = Decision::Reject(RejectReason::SecretMismatch);
        assert!(!reject.is_trust());
        assert_eq!(reject.reject_reason(), Some(RejectReason::SecretMismatch));
        assert_eq!(reject.reject_reason().unwrap().to_string(), "secret_mismatch");
    }
}
