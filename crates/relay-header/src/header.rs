use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::EncodeError;

/// Wire format of a relay header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Human-readable text line (`PROXY TCP4 ...\r\n`).
    V1,
    /// Binary layout with a 12-byte signature and TLV extensions.
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V2 => f.write_str("v2"),
        }
    }
}

/// The "real client" metadata a relay announces ahead of the stream.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayHeader {
    pub version: ProtocolVersion,
    /// Address of the client as seen by the relay.
    pub origin_ip: IpAddr,
    /// Client source port. `None` is written as port 0.
    pub origin_port: Option<u16>,
    /// Opaque token proving the relay knows the shared secret. Only
    /// representable in v2 headers.
    pub auth_token: Option<Bytes>,
}

impl RelayHeader {
    /// Header announcing `origin`. A port of 0 is treated as absent.
    pub fn new(version: ProtocolVersion, origin: SocketAddr) -> Self {
        Self {
            version,
            origin_ip: origin.ip(),
            origin_port: match origin.port() {
                0 => None,
                port => Some(port),
            },
            auth_token: None,
        }
    }

    /// Attach an authentication token, consuming and returning `self`.
    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// The announced origin as a socket address, using `fallback_port` when
    /// the header carries no port.
    pub fn origin(&self, fallback_port: u16) -> SocketAddr {
        SocketAddr::new(self.origin_ip, self.origin_port.unwrap_or(fallback_port))
    }

    /// Check the invariants every encodable header must hold.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.origin_port == Some(0) {
            return Err(EncodeError::ZeroPort);
        }
        if self.version == ProtocolVersion::V1 && self.auth_token.is_some() {
            return Err(EncodeError::TokenUnsupported {
                version: self.version,
            });
        }
        Ok(())
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for RelayHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHeader")
            .field("version", &self.version)
            .field("origin_ip", &self.origin_ip)
            .field("origin_port", &self.origin_port)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|t| format!("<{} bytes>", t.len())),
            )
            .finish()
    }
}
