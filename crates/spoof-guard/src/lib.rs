//! # spoof-guard
//!
//! Trust policy for relay headers. [`decide`] combines a parse outcome, the
//! connection's literal peer address and a registry snapshot into a single
//! [`Decision`]: rewrite the origin, pass the connection through untouched,
//! or reject it with a [`RejectReason`].
//!
//! ## Usage
//!
//! ```rust
//! use peer_registry::{RegistrySnapshot, TrustedPeerConfig};
//! use relay_header::{try_parse, encode, ProtocolVersion, RelayHeader};
//! use spoof_guard::{decide, Decision, GuardConfig};
//!
//! let snapshot = RegistrySnapshot::compile(
//!     vec![TrustedPeerConfig::new("10.0.0.0/8".parse().unwrap(), "edge-lb")],
//!     1,
//! ).unwrap();
//! let header = RelayHeader::new(ProtocolVersion::V2, "203.0.113.9:51000".parse().unwrap());
//! let wire = encode(&header).unwrap();
//!
//! let decision = decide(
//!     &snapshot,
//!     &GuardConfig::default(),
//!     "10.0.0.5:40000".parse().unwrap(),
//!     &try_parse(&wire),
//! );
//! assert!(matches!(decision, Decision::Trust { .. }));
//! ```

mod config;
mod decision;
mod guard;

pub use config::{GuardConfig, GuardConfigError, MIN_PROBE_BYTES};
pub use decision::{Decision, RejectReason};
pub use guard::decide;
