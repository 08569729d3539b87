//! # peer-registry
//!
//! The set of upstream relays allowed to announce a client address. Each
//! entry is a CIDR block (or exact address), an optional shared secret and a
//! label for logs.
//!
//! The live list sits behind a [`RegistryHandle`]. Readers take an
//! `Arc<RegistrySnapshot>` without locking; [`RegistryHandle::reload`]
//! validates a whole replacement list and publishes it atomically, keeping
//! the previous snapshot if validation fails.
//!
//! ## Quick start
//!
//! ```rust
//! use peer_registry::{loader, RegistryHandle};
//!
//! let file = loader::load_peers_from_str(r#"
//! version: "1.0"
//! peers:
//!   - range: "10.0.0.0/8"
//!     label: "edge-lb"
//! "#).unwrap();
//! let registry = RegistryHandle::from_config(file.peers).unwrap();
//! let entry = registry.snapshot().lookup("10.0.0.5".parse().unwrap()).cloned();
//! assert_eq!(entry.unwrap().label, "edge-lb");
//! ```

mod entry;
mod error;
pub mod loader;
pub mod range;
mod registry;
mod schema;

pub use entry::{SharedSecret, TrustedPeerEntry};
pub use error::RegistryError;
pub use range::{IpRange, RangeError};
pub use registry::{validate_peers, RegistryHandle, RegistrySnapshot};
pub use schema::{PeersFile, TrustedPeerConfig};
