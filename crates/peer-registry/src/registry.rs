use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::entry::{SharedSecret, TrustedPeerEntry};
use crate::error::RegistryError;
use crate::range::{self, IpRange};
use crate::schema::TrustedPeerConfig;

// ---------------------------------------------------------------------------
// RegistrySnapshot
// ---------------------------------------------------------------------------

/// Immutable, compiled view of the trusted-peer list.
///
/// Connections capture an `Arc` of the snapshot current at accept time and
/// keep using it even if the registry is reloaded underneath them.
pub struct RegistrySnapshot {
    /// Sorted by descending prefix length so the first hit is the most
    /// specific range.
    entries: Vec<TrustedPeerEntry>,
    generation: u64,
    loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("generation", &self.generation)
            .field("num_peers", &self.entries.len())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl RegistrySnapshot {
    /// A snapshot that trusts nobody.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            generation: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Validate and compile `peers` into a snapshot tagged with `generation`.
    pub fn compile(
        peers: Vec<TrustedPeerConfig>,
        generation: u64,
    ) -> Result<Self, RegistryError> {
        validate_peers(&peers)?;

        let mut entries = Vec::with_capacity(peers.len());
        for peer in peers {
            let secret = peer.secret_bytes()?.map(SharedSecret::new);
            entries.push(TrustedPeerEntry {
                range: peer.range,
                secret,
                label: peer.label,
            });
        }
        entries.sort_by_key(|e| std::cmp::Reverse(e.range.prefix_len()));

        Ok(Self {
            entries,
            generation,
            loaded_at: Utc::now(),
        })
    }

    /// Find the entry covering `peer`, the literal socket address of the
    /// immediate connection. Header contents must never be passed here.
    pub fn lookup(&self, peer: IpAddr) -> Option<&TrustedPeerEntry> {
        let peer = range::normalize(peer);
        self.entries.iter().find(|e| e.range.contains(peer))
    }

    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        self.lookup(peer).is_some()
    }

    pub fn entries(&self) -> &[TrustedPeerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Check a peer list without compiling it: labels non-empty and unique,
/// ranges unique, secrets non-empty when present.
pub fn validate_peers(peers: &[TrustedPeerConfig]) -> Result<(), RegistryError> {
    let mut labels = HashSet::with_capacity(peers.len());
    let mut ranges: HashMap<IpRange, &str> = HashMap::with_capacity(peers.len());

    for peer in peers {
        if peer.label.trim().is_empty() {
            return Err(RegistryError::EmptyLabel(peer.range));
        }
        if !labels.insert(peer.label.as_str()) {
            return Err(RegistryError::DuplicateLabel(peer.label.clone()));
        }
        if let Some(first) = ranges.insert(peer.range, peer.label.as_str()) {
            return Err(RegistryError::DuplicateRange {
                range: peer.range,
                first: first.to_string(),
                second: peer.label.clone(),
            });
        }
        peer.secret_bytes()?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// RegistryHandle
// ---------------------------------------------------------------------------

struct Inner {
    current: ArcSwap<RegistrySnapshot>,
    /// Serializes reloads so generations are assigned in order.
    reload_lock: Mutex<()>,
}

/// Shared handle to the live registry. Cheap to clone.
///
/// Reads are lock-free. `reload` compiles the new list off to the side and
/// publishes it with a single atomic store; a list that fails validation is
/// discarded and the previous snapshot stays live.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegistryHandle")
            .field(&*self.inner.current.load())
            .finish()
    }
}

impl RegistryHandle {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(snapshot),
                reload_lock: Mutex::new(()),
            }),
        }
    }

    /// A registry with no trusted peers.
    pub fn empty() -> Self {
        Self::new(RegistrySnapshot::empty())
    }

    /// Compile the initial list. Startup is the one place a bad list is fatal.
    pub fn from_config(peers: Vec<TrustedPeerConfig>) -> Result<Self, RegistryError> {
        let snapshot = RegistrySnapshot::compile(peers, 1)?;
        info!(
            peers = snapshot.len(),
            generation = snapshot.generation(),
            "trusted-peer registry loaded"
        );
        Ok(Self::new(snapshot))
    }

    /// The snapshot currently published.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.inner.current.load().generation()
    }

    /// Replace the whole list. Returns the new generation on success.
    pub fn reload(&self, peers: Vec<TrustedPeerConfig>) -> Result<u64, RegistryError> {
        let _guard = self
            .inner
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self.inner.current.load_full();
        let generation = previous.generation() + 1;

        match RegistrySnapshot::compile(peers, generation) {
            Ok(snapshot) => {
                debug!(
                    previous_peers = previous.len(),
                    peers = snapshot.len(),
                    "compiled replacement registry"
                );
                info!(
                    peers = snapshot.len(),
                    generation,
                    "trusted-peer registry reloaded"
                );
                self.inner.current.store(Arc::new(snapshot));
                Ok(generation)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    generation = previous.generation(),
                    "registry reload rejected; keeping last-known-good list"
                );
                Err(e)
            }
        }
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn peer(range: &str, label: &str) -> TrustedPeerConfig {
        TrustedPeerConfig::new(range.parse().unwrap(), label)
    }

    fn sample() -> Vec<TrustedPeerConfig> {
        vec![
            peer("10.0.0.0/8", "wide"),
            peer("10.0.0.0/24", "narrow").with_secret("S"),
            peer("2001:db8::/32", "v6-edge"),
        ]
    }

    #[test]
    fn lookup_prefers_longest_prefix() {
        let snap = RegistrySnapshot::compile(sample(), 1).unwrap();
        assert_eq!(snap.lookup(ip("10.0.0.5")).unwrap().label, "narrow");
        assert_eq!(snap.lookup(ip("10.9.0.5")).unwrap().label, "wide");
        assert_eq!(snap.lookup(ip("2001:db8::1")).unwrap().label, "v6-edge");
        assert!(snap.lookup(ip("192.0.2.1")).is_none());
    }

    #[test]
    fn lookup_normalizes_mapped_addresses() {
        let snap = RegistrySnapshot::compile(sample(), 1).unwrap();
        assert_eq!(snap.lookup(ip("::ffff:10.0.0.5")).unwrap().label, "narrow");
        assert!(snap.is_trusted(ip("::ffff:10.1.1.1")));
    }

    #[test]
    fn empty_snapshot_trusts_nobody() {
        let snap = RegistrySnapshot::empty();
        assert!(snap.is_empty());
        assert!(!snap.is_trusted(ip("127.0.0.1")));
        assert_eq!(snap.generation(), 0);
    }

    #[test]
    fn compile_carries_secrets() {
        let snap = RegistrySnapshot::compile(sample(), 1).unwrap();
        let narrow = snap.lookup(ip("10.0.0.5")).unwrap();
        assert!(narrow.verify_secret(Some(b"S")));
        assert!(!narrow.verify_secret(None));
        assert!(snap.lookup(ip("10.9.0.5")).unwrap().verify_secret(None));
    }

    #[test]
    fn validation_errors() {
        let err = validate_peers(&[peer("10.0.0.0/8", "a"), peer("10.0.0.0/8", "b")]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRange { .. }));

        let err = validate_peers(&[peer("10.0.0.0/8", "a"), peer("10.1.0.0/16", "a")]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateLabel("a".into()));

        let err = validate_peers(&[peer("10.0.0.0/8", "  ")]).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyLabel(_)));

        let err = validate_peers(&[peer("10.0.0.0/8", "a").with_secret("")]).unwrap_err();
        assert_eq!(err, RegistryError::EmptySecret("a".into()));

        let err = validate_peers(&[peer("10.0.0.0/8", "a").with_secret_hex("0g")]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSecretHex { .. }));
    }

    #[test]
    fn mapped_range_is_a_duplicate_of_its_ipv4_form() {
        let err = validate_peers(&[peer("10.0.0.5", "a"), peer("::ffff:10.0.0.5", "b")]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRange { .. }));
    }

    #[test]
    fn mapped_range_matches_ipv4_and_mapped_peers() {
        let snap = RegistrySnapshot::compile(vec![peer("::ffff:10.0.0.5", "mapped-lb")], 1).unwrap();
        assert_eq!(snap.lookup(ip("10.0.0.5")).unwrap().label, "mapped-lb");
        assert_eq!(snap.lookup(ip("::ffff:10.0.0.5")).unwrap().label, "mapped-lb");
        assert!(snap.lookup(ip("10.0.0.6")).is_none());
    }

    #[test]
    fn hex_secret_is_compared_as_raw_bytes() {
        let snap = RegistrySnapshot::compile(
            vec![peer("10.0.0.0/24", "binary").with_secret_hex("00ff10")],
            1,
        )
        .unwrap();
        let entry = snap.lookup(ip("10.0.0.9")).unwrap();
        assert!(entry.verify_secret(Some(&[0x00, 0xff, 0x10][..])));
        assert!(!entry.verify_secret(Some(b"00ff10")));
    }

    #[test]
    fn reload_swaps_and_bumps_generation() {
        let handle = RegistryHandle::from_config(vec![peer("10.0.0.0/8", "old")]).unwrap();
        assert_eq!(handle.generation(), 1);

        let held = handle.snapshot();
        let generation = handle.reload(vec![peer("192.0.2.0/24", "new")]).unwrap();
        assert_eq!(generation, 2);

        // Captured snapshot is unaffected by the swap.
        assert_eq!(held.lookup(ip("10.0.0.5")).unwrap().label, "old");
        assert!(held.lookup(ip("192.0.2.9")).is_none());

        let current = handle.snapshot();
        assert!(current.lookup(ip("10.0.0.5")).is_none());
        assert_eq!(current.lookup(ip("192.0.2.9")).unwrap().label, "new");
    }

    #[test]
    fn failed_reload_keeps_last_known_good() {
        let handle = RegistryHandle::from_config(sample()).unwrap();
        let bad = vec![peer("10.0.0.0/8", "x"), peer("10.0.0.0/8", "y")];
        assert!(handle.reload(bad).is_err());

        let snap = handle.snapshot();
        assert_eq!(snap.generation(), 1);
        assert_eq!(snap.lookup(ip("10.0.0.5")).unwrap().label, "narrow");
    }

    #[test]
    fn reloading_same_list_is_idempotent() {
        let handle = RegistryHandle::from_config(sample()).unwrap();
        handle.reload(sample()).unwrap();
        let first = handle.snapshot();
        handle.reload(sample()).unwrap();
        let second = handle.snapshot();

        assert_eq!(first.entries(), second.entries());
        for addr in ["10.0.0.5", "10.9.9.9", "2001:db8::1", "203.0.113.1"] {
            assert_eq!(
                first.lookup(ip(addr)).map(|e| &e.label),
                second.lookup(ip(addr)).map(|e| &e.label)
            );
        }
    }

    #[test]
    fn clones_share_the_same_registry() {
        let handle = RegistryHandle::empty();
        let clone = handle.clone();
        handle.reload(vec![peer("10.0.0.0/8", "lb")]).unwrap();
        assert!(clone.snapshot().is_trusted(ip("10.1.2.3")));
    }

    #[test]
    fn debug_shows_counts_not_secrets() {
        let snap = RegistrySnapshot::compile(sample(), 7).unwrap();
        let rendered = format!("{snap:?}");
        assert!(rendered.contains("num_peers: 3"));
        assert!(rendered.contains("generation: 7"));
    }
}
