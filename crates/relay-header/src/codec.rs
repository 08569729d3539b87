use std::net::IpAddr;

use bytes::{Bytes, BytesMut};
use ppp::HeaderResult;

use crate::error::{EncodeError, MalformedReason};
use crate::header::{ProtocolVersion, RelayHeader};
use crate::{v1, v2};

/// Result of probing the start of a stream for a relay header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A complete, valid header occupying the first `consumed` bytes.
    Present { header: RelayHeader, consumed: usize },
    /// The stream does not start with a relay header.
    NotPresent,
    /// Every byte so far matches a header; more are needed to decide.
    Incomplete,
    /// A header signature matched but the header itself is invalid.
    Malformed(MalformedReason),
}

enum PrefixMatch {
    Full,
    Partial,
    Mismatch,
}

fn match_prefix(buf: &[u8], signature: &[u8]) -> PrefixMatch {
    let n = buf.len().min(signature.len());
    if buf[..n] != signature[..n] {
        PrefixMatch::Mismatch
    } else if n == signature.len() {
        PrefixMatch::Full
    } else {
        PrefixMatch::Partial
    }
}

/// Probe `buf` for a relay header.
///
/// Only the header's own bytes are examined; anything after `consumed` is
/// left for the wrapped protocol. An empty buffer is `Incomplete`.
pub fn try_parse(buf: &[u8]) -> ParseOutcome {
    if buf.is_empty() {
        return ParseOutcome::Incomplete;
    }

    let framed = match (match_prefix(buf, &v2::SIGNATURE), match_prefix(buf, v1::PREFIX)) {
        (PrefixMatch::Full, _) => v2::frame(buf),
        (_, PrefixMatch::Full) => v1::frame(buf),
        (PrefixMatch::Partial, _) | (_, PrefixMatch::Partial) => return ParseOutcome::Incomplete,
        (PrefixMatch::Mismatch, PrefixMatch::Mismatch) => return ParseOutcome::NotPresent,
    };

    match framed {
        Ok(Some(len)) => match decode(&buf[..len]) {
            Ok(header) => ParseOutcome::Present {
                header,
                consumed: len,
            },
            Err(reason) => ParseOutcome::Malformed(reason),
        },
        Ok(None) => ParseOutcome::Incomplete,
        Err(reason) => ParseOutcome::Malformed(reason),
    }
}

/// Decode one complete, framed header.
fn decode(frame: &[u8]) -> Result<RelayHeader, MalformedReason> {
    match HeaderResult::parse(frame) {
        HeaderResult::V1(Ok(header)) => {
            let (origin_ip, port) = match header.addresses {
                ppp::v1::Addresses::Tcp4(ip) => (IpAddr::V4(ip.source_address), ip.source_port),
                ppp::v1::Addresses::Tcp6(ip) => (IpAddr::V6(ip.source_address), ip.source_port),
                ppp::v1::Addresses::Unknown => return Err(MalformedReason::UnknownProtocol),
            };
            Ok(RelayHeader {
                version: ProtocolVersion::V1,
                origin_ip,
                origin_port: (port != 0).then_some(port),
                auth_token: None,
            })
        }
        HeaderResult::V1(Err(err)) => Err(MalformedReason::Invalid {
            version: ProtocolVersion::V1,
            detail: err.to_string(),
        }),
        HeaderResult::V2(Ok(header)) => {
            let (origin_ip, port) = match &header.addresses {
                ppp::v2::Addresses::IPv4(ip) => (IpAddr::V4(ip.source_address), ip.source_port),
                ppp::v2::Addresses::IPv6(ip) => (IpAddr::V6(ip.source_address), ip.source_port),
                ppp::v2::Addresses::Unix(_) | ppp::v2::Addresses::Unspecified => {
                    return Err(MalformedReason::UnsupportedFamily(frame[13]));
                }
            };
            let auth_token = v2::read_token(&header)?;
            Ok(RelayHeader {
                version: ProtocolVersion::V2,
                origin_ip,
                origin_port: (port != 0).then_some(port),
                auth_token,
            })
        }
        HeaderResult::V2(Err(err)) => Err(MalformedReason::Invalid {
            version: ProtocolVersion::V2,
            detail: err.to_string(),
        }),
    }
}

/// Total header length as soon as the buffered bytes announce it.
///
/// Known for v2 after the 16-byte fixed part. v1 lines are only delimited by
/// their terminator, so this returns `None` for them.
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    v2::declared_len(buf)
}

/// Encode `header`. The result parses back to an identical header.
pub fn encode(header: &RelayHeader) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::new();
    encode_into(header, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the encoding of `header` to `buf`. Nothing is written on error.
pub fn encode_into(header: &RelayHeader, buf: &mut BytesMut) -> Result<(), EncodeError> {
    header.validate()?;
    match header.version {
        ProtocolVersion::V1 => v1::write(header, buf),
        ProtocolVersion::V2 => v2::write(header, buf),
    }
}
