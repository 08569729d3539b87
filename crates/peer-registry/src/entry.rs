use std::fmt;

use bytes::Bytes;
use subtle::ConstantTimeEq;

use crate::range::IpRange;

/// Opaque secret shared between this instance and one relay.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Bytes);

impl SharedSecret {
    pub fn new(secret: impl Into<Bytes>) -> Self {
        Self(secret.into())
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_ref().ct_eq(presented).into()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes>)", self.0.len())
    }
}

/// One relay (or block of relays) allowed to announce client addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedPeerEntry {
    pub range: IpRange,
    pub secret: Option<SharedSecret>,
    pub label: String,
}

impl TrustedPeerEntry {
    pub fn requires_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Check a presented token. Entries without a secret accept anything;
    /// entries with one require a matching token.
    pub fn verify_secret(&self, presented: Option<&[u8]>) -> bool {
        match (&self.secret, presented) {
            (None, _) => true,
            (Some(secret), Some(token)) => secret.matches(token),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(secret: Option<&str>) -> TrustedPeerEntry {
        TrustedPeerEntry {
            range: "10.0.0.0/8".parse().unwrap(),
            secret: secret.map(|s| SharedSecret::new(s.as_bytes().to_vec())),
            label: "lb".to_string(),
        }
    }

    #[test]
    fn entry_without_secret_accepts_any_token() {
        let e = entry(None);
        assert!(!e.requires_secret());
        assert!(e.verify_secret(None));
        assert!(e.verify_secret(Some(b"whatever")));
    }

    #[test]
    fn entry_with_secret_requires_exact_token() {
        let e = entry(Some("S"));
        assert!(e.requires_secret());
        assert!(e.verify_secret(Some(b"S")));
        assert!(!e.verify_secret(Some(b"s")));
        assert!(!e.verify_secret(Some(b"SS")));
        assert!(!e.verify_secret(Some(b"")));
        assert!(!e.verify_secret(None));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let s = SharedSecret::new(&b"correct horse"[..]);
        assert_eq!(format!("{s:?}"), "SharedSecret(<13 bytes>)");
        assert_eq!(s.len(), 13);
    }
}
