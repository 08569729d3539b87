use thiserror::Error;

use crate::header::ProtocolVersion;

/// Why a buffer that started with a relay-header signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("unsupported header version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported header command {0:#x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address family/transport {0:#04x}")]
    UnsupportedFamily(u8),

    #[error("declared length {declared} is shorter than the {required}-byte address block")]
    LengthTooShort { declared: usize, required: usize },

    #[error("TLV extends past the declared header length")]
    TruncatedTlv,

    #[error("authentication token TLV appears more than once")]
    DuplicateToken,

    #[error("v1 header has no CRLF terminator within {0} bytes")]
    MissingTerminator(usize),

    #[error("v1 header contains a non-printable byte at offset {0}")]
    NonPrintable(usize),

    #[error("v1 header announces an unknown protocol")]
    UnknownProtocol,

    /// Framing was fine but the header body did not decode.
    #[error("invalid {version} header: {detail}")]
    Invalid {
        version: ProtocolVersion,
        detail: String,
    },
}

/// Errors from [`encode`](crate::encode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Port 0 is the wire encoding of "no port"; `Some(0)` cannot round-trip.
    #[error("origin port must be omitted rather than set to 0")]
    ZeroPort,

    #[error("{version:?} headers cannot carry an authentication token")]
    TokenUnsupported { version: ProtocolVersion },

    #[error("authentication token of {len} bytes does not fit in the header")]
    TokenTooLong { len: usize },

    #[error("failed to build header: {0}")]
    Write(String),
}
