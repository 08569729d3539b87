//! # relay-header
//!
//! Parser and encoder for the relay header that a trusted upstream hop puts
//! in front of a relayed TCP stream to announce the real client address.
//!
//! The header uses the HAProxy PROXY protocol layout. Version 2 (binary) is
//! the primary format; version 1 (text) is understood but callers decide
//! whether to accept it, since its ASCII prefix can collide with text
//! protocols. Framing is done here on the raw bytes; decoding and building
//! the header body go through the `ppp` crate.
//!
//! Parsing is a pure function over the bytes buffered so far and reports one
//! of four outcomes:
//!
//! * [`ParseOutcome::Present`] with the exact number of bytes the header
//!   occupies. Everything after that belongs to the wrapped protocol.
//! * [`ParseOutcome::NotPresent`] when the stream cannot start with a header.
//! * [`ParseOutcome::Incomplete`] when every byte so far is consistent with a
//!   header but more are needed.
//! * [`ParseOutcome::Malformed`] when a signature matched but the rest is
//!   invalid. This is never folded into `NotPresent`.
//!
//! ## Quick start
//!
//! ```rust
//! use relay_header::{encode, try_parse, ParseOutcome, ProtocolVersion, RelayHeader};
//!
//! let header = RelayHeader::new(ProtocolVersion::V2, "203.0.113.9:51000".parse().unwrap());
//! let mut wire = encode(&header).unwrap().to_vec();
//! wire.extend_from_slice(b"payload");
//!
//! match try_parse(&wire) {
//!     ParseOutcome::Present { header: parsed, consumed } => {
//!         assert_eq!(parsed, header);
//!         assert_eq!(&wire[consumed..], b"payload");
//!     }
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! ```

mod codec;
mod error;
mod header;
pub mod v1;
pub mod v2;

pub use codec::{declared_len, encode, encode_into, try_parse, ParseOutcome};
pub use error::{EncodeError, MalformedReason};
pub use header::{ProtocolVersion, RelayHeader};
