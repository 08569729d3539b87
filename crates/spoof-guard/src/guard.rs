use std::net::SocketAddr;

use peer_registry::RegistrySnapshot;
use relay_header::{ParseOutcome, ProtocolVersion};

use crate::config::GuardConfig;
use crate::decision::{Decision, RejectReason};

/// Decide what to do with a connection from `peer` whose leading bytes
/// parsed to `outcome`.
///
/// Pure: the result depends only on the arguments. `peer` is the literal
/// socket address of the immediate connection and is the only address ever
/// checked against the registry.
///
/// `Incomplete` is treated as malformed; callers only pass it once the probe
/// window or deadline has run out.
pub fn decide(
    snapshot: &RegistrySnapshot,
    config: &GuardConfig,
    peer: SocketAddr,
    outcome: &ParseOutcome,
) -> Decision {
    let header = match outcome {
        ParseOutcome::NotPresent if config.allow_unverified_direct => return Decision::PassThrough,
        ParseOutcome::NotPresent => return Decision::Reject(RejectReason::HeaderRequired),
        ParseOutcome::Incomplete | ParseOutcome::Malformed(_) => {
            return Decision::Reject(RejectReason::HeaderMalformed)
        }
        ParseOutcome::Present { header, .. } => header,
    };

    if header.version == ProtocolVersion::V1 && !config.accept_v1 {
        return Decision::Reject(RejectReason::VersionNotAllowed);
    }

    let Some(entry) = snapshot.lookup(peer.ip()) else {
        return Decision::Reject(RejectReason::PeerNotTrusted);
    };

    if config.strict_secret && !entry.requires_secret() {
        return Decision::Reject(RejectReason::SecretMismatch);
    }
    if !entry.verify_secret(header.auth_token.as_deref()) {
        return Decision::Reject(RejectReason::SecretMismatch);
    }

    Decision::Trust {
        origin: header.origin(peer.port()),
        label: entry.label.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_registry::TrustedPeerConfig;
    use relay_header::{MalformedReason, RelayHeader};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn registry(peers: Vec<TrustedPeerConfig>) -> RegistrySnapshot {
        RegistrySnapshot::compile(peers, 1).unwrap()
    }

    fn lb() -> TrustedPeerConfig {
        TrustedPeerConfig::new("10.0.0.5".parse().unwrap(), "lb")
    }

    fn present(header: RelayHeader) -> ParseOutcome {
        ParseOutcome::Present {
            header,
            consumed: 28,
        }
    }

    fn v2_from(origin: &str) -> RelayHeader {
        RelayHeader::new(ProtocolVersion::V2, addr(origin))
    }

    #[test]
    fn registered_relay_rewrites_origin() {
        let snap = registry(vec![lb()]);
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("10.0.0.5:40000"),
            &present(v2_from("203.0.113.9:51000")),
        );
        assert_eq!(
            d,
            Decision::Trust {
                origin: addr("203.0.113.9:51000"),
                label: "lb".into(),
            }
        );
    }

    #[test]
    fn missing_header_port_keeps_peer_port() {
        let snap = registry(vec![lb()]);
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("10.0.0.5:40000"),
            &present(v2_from("203.0.113.9:0")),
        );
        assert_eq!(
            d,
            Decision::Trust {
                origin: addr("203.0.113.9:40000"),
                label: "lb".into(),
            }
        );
    }

    #[test]
    fn unregistered_peer_is_rejected() {
        let snap = registry(vec![lb()]);
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("198.51.100.7:40000"),
            &present(v2_from("203.0.113.9:51000")),
        );
        assert_eq!(d, Decision::Reject(RejectReason::PeerNotTrusted));
    }

    #[test]
    fn header_contents_never_grant_trust() {
        // The header claims to come from the registered relay itself.
        let snap = registry(vec![lb()]);
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("198.51.100.7:40000"),
            &present(v2_from("10.0.0.5:40000")),
        );
        assert_eq!(d, Decision::Reject(RejectReason::PeerNotTrusted));
    }

    #[test]
    fn empty_registry_rejects_every_header() {
        let snap = RegistrySnapshot::empty();
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("10.0.0.5:40000"),
            &present(v2_from("203.0.113.9:51000")),
        );
        assert_eq!(d, Decision::Reject(RejectReason::PeerNotTrusted));
    }

    #[test]
    fn secret_must_match() {
        let snap = registry(vec![lb().with_secret("S")]);
        let cfg = GuardConfig::default();
        let peer = addr("10.0.0.5:40000");

        let missing = present(v2_from("203.0.113.9:51000"));
        assert_eq!(
            decide(&snap, &cfg, peer, &missing),
            Decision::Reject(RejectReason::SecretMismatch)
        );

        let wrong = present(v2_from("203.0.113.9:51000").with_token(&b"T"[..]));
        assert_eq!(
            decide(&snap, &cfg, peer, &wrong),
            Decision::Reject(RejectReason::SecretMismatch)
        );

        let right = present(v2_from("203.0.113.9:51000").with_token(&b"S"[..]));
        assert!(decide(&snap, &cfg, peer, &right).is_trust());
    }

    #[test]
    fn strict_secret_refuses_entries_without_secret() {
        let snap = registry(vec![lb()]);
        let cfg = GuardConfig {
            strict_secret: true,
            ..GuardConfig::default()
        };
        let d = decide(
            &snap,
            &cfg,
            addr("10.0.0.5:40000"),
            &present(v2_from("203.0.113.9:51000").with_token(&b"anything"[..])),
        );
        assert_eq!(d, Decision::Reject(RejectReason::SecretMismatch));
    }

    #[test]
    fn no_header_follows_direct_policy() {
        let snap = registry(vec![lb()]);
        let strict = GuardConfig::default();
        let lenient = GuardConfig {
            allow_unverified_direct: true,
            ..GuardConfig::default()
        };

        for peer in ["10.0.0.5:40000", "198.51.100.7:40000"] {
            assert_eq!(
                decide(&snap, &strict, addr(peer), &ParseOutcome::NotPresent),
                Decision::Reject(RejectReason::HeaderRequired)
            );
            assert_eq!(
                decide(&snap, &lenient, addr(peer), &ParseOutcome::NotPresent),
                Decision::PassThrough
            );
        }
    }

    #[test]
    fn malformed_and_incomplete_are_rejected_even_when_lenient() {
        let snap = registry(vec![lb()]);
        let lenient = GuardConfig {
            allow_unverified_direct: true,
            ..GuardConfig::default()
        };
        let peer = addr("10.0.0.5:40000");

        assert_eq!(
            decide(
                &snap,
                &lenient,
                peer,
                &ParseOutcome::Malformed(MalformedReason::TruncatedTlv)
            ),
            Decision::Reject(RejectReason::HeaderMalformed)
        );
        assert_eq!(
            decide(&snap, &lenient, peer, &ParseOutcome::Incomplete),
            Decision::Reject(RejectReason::HeaderMalformed)
        );
    }

    #[test]
    fn v1_requires_opt_in() {
        let snap = registry(vec![lb()]);
        let header = present(RelayHeader::new(ProtocolVersion::V1, addr("203.0.113.9:51000")));
        let peer = addr("10.0.0.5:40000");

        assert_eq!(
            decide(&snap, &GuardConfig::default(), peer, &header),
            Decision::Reject(RejectReason::VersionNotAllowed)
        );

        let cfg = GuardConfig {
            accept_v1: true,
            ..GuardConfig::default()
        };
        assert!(decide(&snap, &cfg, peer, &header).is_trust());
    }

    #[test]
    fn mapped_ipv6_peer_is_matched_as_ipv4() {
        let snap = registry(vec![lb()]);
        let d = decide(
            &snap,
            &GuardConfig::default(),
            addr("[::ffff:10.0.0.5]:40000"),
            &present(v2_from("[2001:db8::9]:443")),
        );
        assert_eq!(
            d,
            Decision::Trust {
                origin: addr("[2001:db8::9]:443"),
                label: "lb".into(),
            }
        );
    }

    #[test]
    fn decide_is_deterministic() {
        let snap = registry(vec![lb().with_secret("S")]);
        let outcome = present(v2_from("203.0.113.9:51000").with_token(&b"S"[..]));
        let first = decide(&snap, &GuardConfig::default(), addr("10.0.0.5:1"), &outcome);
        for _ in 0..16 {
            assert_eq!(
                decide(&snap, &GuardConfig::default(), addr("10.0.0.5:1"), &outcome),
                first
            );
        }
    }
}
