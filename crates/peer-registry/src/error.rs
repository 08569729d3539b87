use thiserror::Error;

use crate::range::IpRange;

/// Reasons a trusted-peer list cannot be compiled into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("peer label must not be empty (range {0})")]
    EmptyLabel(IpRange),

    #[error("duplicate peer label: '{0}'")]
    DuplicateLabel(String),

    #[error("range {range} is listed twice ('{first}' and '{second}')")]
    DuplicateRange {
        range: IpRange,
        first: String,
        second: String,
    },

    #[error("peer '{0}' has an empty secret; omit the field to disable the check")]
    EmptySecret(String),

    #[error("peer '{0}' sets both secret and secret_hex")]
    ConflictingSecrets(String),

    #[error("peer '{label}' has an invalid secret_hex: {reason}")]
    InvalidSecretHex { label: String, reason: String },
}
