use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::range::IpRange;

/// Top-level peers file loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersFile {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Relays allowed to announce client addresses.
    #[serde(default)]
    pub peers: Vec<TrustedPeerConfig>,
}

/// Configuration form of one trusted relay, before compilation into a
/// registry snapshot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPeerConfig {
    /// CIDR block or exact address of the relay's socket address.
    pub range: IpRange,
    /// Human-readable, unique name used in logs and audit events.
    pub label: String,
    /// Token the relay must present in its header, if any, taken as the
    /// UTF-8 bytes of the string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// The same token written as hex, for secrets that are not valid UTF-8.
    /// Mutually exclusive with `secret`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_hex: Option<String>,
}

impl TrustedPeerConfig {
    pub fn new(range: IpRange, label: impl Into<String>) -> Self {
        Self {
            range,
            label: label.into(),
            secret: None,
            secret_hex: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_secret_hex(mut self, secret_hex: impl Into<String>) -> Self {
        self.secret_hex = Some(secret_hex.into());
        self
    }

    /// The raw token bytes this peer must present, decoded from whichever
    /// secret field is set.
    pub fn secret_bytes(&self) -> Result<Option<Vec<u8>>, RegistryError> {
        let bytes = match (&self.secret, &self.secret_hex) {
            (Some(_), Some(_)) => {
                return Err(RegistryError::ConflictingSecrets(self.label.clone()));
            }
            (Some(text), None) => text.as_bytes().to_vec(),
            (None, Some(encoded)) => hex::decode(encoded.trim()).map_err(|err| {
                RegistryError::InvalidSecretHex {
                    label: self.label.clone(),
                    reason: err.to_string(),
                }
            })?,
            (None, None) => return Ok(None),
        };
        if bytes.is_empty() {
            return Err(RegistryError::EmptySecret(self.label.clone()));
        }
        Ok(Some(bytes))
    }
}

impl fmt::Debug for TrustedPeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedPeerConfig")
            .field("range", &self.range)
            .field("label", &self.label)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_hex", &self.secret_hex.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
