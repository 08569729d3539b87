use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing an address range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),

    #[error("'{0}' is not a valid prefix length")]
    InvalidPrefix(String),

    #[error("prefix length /{prefix} exceeds /{max} for this address family")]
    PrefixTooLong { prefix: u8, max: u8 },

    #[error("'{0}' has host bits set; write the network address instead")]
    HostBitsSet(String),

    #[error("IPv4-mapped range /{0} spans more than the mapped block; use /96 or longer")]
    MappedPrefixTooShort(u8),
}

/// A CIDR block (`10.0.0.0/8`, `2001:db8::/32`) or an exact address, which
/// is stored as a full-length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpRange {
    network: IpAddr,
    prefix_len: u8,
}

impl IpRange {
    /// Build a range, rejecting prefixes that are too long or networks with
    /// host bits set. IPv4-mapped networks (`::ffff:10.0.0.0/120`) are
    /// stored as the equivalent IPv4 range, since lookups see peers in
    /// IPv4 form.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, RangeError> {
        let max = max_prefix(network);
        if prefix_len > max {
            return Err(RangeError::PrefixTooLong {
                prefix: prefix_len,
                max,
            });
        }
        if let IpAddr::V6(v6) = network {
            if let Some(v4) = v6.to_ipv4_mapped() {
                if prefix_len < 96 {
                    return Err(RangeError::MappedPrefixTooShort(prefix_len));
                }
                return Self::new(IpAddr::V4(v4), prefix_len - 96);
            }
        }
        let range = Self {
            network,
            prefix_len,
        };
        if range.masked(network) != network {
            return Err(RangeError::HostBitsSet(format!("{network}/{prefix_len}")));
        }
        Ok(range)
    }

    /// A range matching exactly one address.
    pub fn host(addr: IpAddr) -> Self {
        let addr = normalize(addr);
        Self {
            network: addr,
            prefix_len: max_prefix(addr),
        }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` falls inside this range. IPv4-mapped IPv6 addresses
    /// are compared as IPv4.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = normalize(addr);
        match (self.network, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                self.masked(addr) == self.network
            }
            _ => false,
        }
    }

    fn masked(&self, addr: IpAddr) -> IpAddr {
        match addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                IpAddr::V4((u32::from(v4) & mask).into())
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        }
    }
}

/// Collapse IPv4-mapped IPv6 addresses (as reported by dual-stack sockets)
/// to plain IPv4.
pub fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        v4 => v4,
    }
}

fn max_prefix(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for IpRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let network: IpAddr = addr
                    .parse()
                    .map_err(|_| RangeError::InvalidAddress(addr.to_string()))?;
                if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RangeError::InvalidPrefix(prefix.to_string()));
                }
                let prefix_len: u8 = prefix
                    .parse()
                    .map_err(|_| RangeError::InvalidPrefix(prefix.to_string()))?;
                Self::new(network, prefix_len)
            }
            None => s
                .parse()
                .map(Self::host)
                .map_err(|_| RangeError::InvalidAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for IpRange {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpRange> for String {
    fn from(range: IpRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_cidr_and_bare_addresses() {
        let r: IpRange = "10.0.0.0/8".parse().unwrap();
        assert_eq!(r.network(), ip("10.0.0.0"));
        assert_eq!(r.prefix_len(), 8);

        let r: IpRange = "10.0.0.5".parse().unwrap();
        assert_eq!(r.prefix_len(), 32);

        let r: IpRange = "2001:db8::/32".parse().unwrap();
        assert_eq!(r.prefix_len(), 32);

        let r: IpRange = "::1".parse().unwrap();
        assert_eq!(r.prefix_len(), 128);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(matches!(
            "10.0.0.0/33".parse::<IpRange>(),
            Err(RangeError::PrefixTooLong { prefix: 33, max: 32 })
        ));
        assert!(matches!(
            "10.0.0.5/8".parse::<IpRange>(),
            Err(RangeError::HostBitsSet(_))
        ));
        assert!(matches!(
            "10.0.0.0/".parse::<IpRange>(),
            Err(RangeError::InvalidPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.0/+8".parse::<IpRange>(),
            Err(RangeError::InvalidPrefix(_))
        ));
        assert!(matches!(
            "lb.internal".parse::<IpRange>(),
            Err(RangeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn containment_respects_prefix() {
        let r: IpRange = "10.0.0.0/8".parse().unwrap();
        assert!(r.contains(ip("10.0.0.5")));
        assert!(r.contains(ip("10.255.255.255")));
        assert!(!r.contains(ip("11.0.0.0")));

        let exact: IpRange = "10.0.0.5".parse().unwrap();
        assert!(exact.contains(ip("10.0.0.5")));
        assert!(!exact.contains(ip("10.0.0.6")));
    }

    #[test]
    fn zero_prefix_matches_whole_family() {
        let any_v4: IpRange = "0.0.0.0/0".parse().unwrap();
        assert!(any_v4.contains(ip("203.0.113.9")));
        assert!(!any_v4.contains(ip("2001:db8::1")));

        let any_v6: IpRange = "::/0".parse().unwrap();
        assert!(any_v6.contains(ip("2001:db8::1")));
    }

    #[test]
    fn mapped_ipv6_peer_matches_ipv4_range() {
        let r: IpRange = "10.0.0.0/24".parse().unwrap();
        assert!(r.contains(ip("::ffff:10.0.0.5")));
        assert_eq!(normalize(ip("::ffff:10.0.0.5")), ip("10.0.0.5"));
        assert_eq!(normalize(ip("2001:db8::1")), ip("2001:db8::1"));
    }

    #[test]
    fn mapped_ranges_are_stored_as_ipv4() {
        let exact: IpRange = "::ffff:10.0.0.5".parse().unwrap();
        assert_eq!(exact, "10.0.0.5".parse().unwrap());
        assert!(exact.contains(ip("10.0.0.5")));
        assert!(exact.contains(ip("::ffff:10.0.0.5")));

        let block: IpRange = "::ffff:10.0.0.0/120".parse().unwrap();
        assert_eq!(block.network(), ip("10.0.0.0"));
        assert_eq!(block.prefix_len(), 24);
        assert!(block.contains(ip("10.0.0.77")));
        assert!(!block.contains(ip("10.0.1.1")));

        assert_eq!(IpRange::host(ip("::ffff:192.0.2.1")).to_string(), "192.0.2.1/32");

        assert!(matches!(
            "::ffff:10.0.0.5/120".parse::<IpRange>(),
            Err(RangeError::HostBitsSet(_))
        ));
        assert!(matches!(
            "::ffff:0.0.0.0/80".parse::<IpRange>(),
            Err(RangeError::MappedPrefixTooShort(80))
        ));
    }

    #[test]
    fn ipv6_containment() {
        let r: IpRange = "2001:db8:abcd::/48".parse().unwrap();
        assert!(r.contains(ip("2001:db8:abcd:12::1")));
        assert!(!r.contains(ip("2001:db8:abce::1")));
        assert!(!r.contains(ip("10.0.0.1")));
    }

    #[test]
    fn display_round_trips() {
        for text in ["10.0.0.0/8", "192.0.2.7/32", "2001:db8::/32"] {
            let r: IpRange = text.parse().unwrap();
            assert_eq!(r.to_string(), text);
        }
    }
}
