//! Text (version 1) relay header: `PROXY TCP4 <src> <dst> <sport> <dport>\r\n`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;

use crate::error::{EncodeError, MalformedReason};
use crate::header::{ProtocolVersion, RelayHeader};

/// Every v1 header starts with these six bytes.
pub const PREFIX: &[u8] = b"PROXY ";

/// Longest legal v1 line, terminator included.
pub const MAX_LEN: usize = 107;

/// Length of the line at the start of `buf`, terminator included. `buf` is
/// known to start with [`PREFIX`]; `Ok(None)` means more bytes are needed.
///
/// Non-printable bytes are rejected as soon as they are seen so binary junk
/// does not wait for the full window.
pub(crate) fn frame(buf: &[u8]) -> Result<Option<usize>, MalformedReason> {
    let window = &buf[..buf.len().min(MAX_LEN)];

    for (idx, &byte) in window.iter().enumerate() {
        match byte {
            b'\r' => {
                return match window.get(idx + 1) {
                    Some(b'\n') => Ok(Some(idx + 2)),
                    Some(_) => Err(MalformedReason::NonPrintable(idx)),
                    None if window.len() < MAX_LEN => Ok(None),
                    None => Err(MalformedReason::MissingTerminator(MAX_LEN)),
                };
            }
            0x20..=0x7E => {}
            _ => return Err(MalformedReason::NonPrintable(idx)),
        }
    }

    if window.len() >= MAX_LEN {
        Err(MalformedReason::MissingTerminator(MAX_LEN))
    } else {
        Ok(None)
    }
}

/// Append the v1 encoding of `header`. The destination is written as the
/// unspecified address with port 0.
pub(crate) fn write(header: &RelayHeader, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if header.auth_token.is_some() {
        return Err(EncodeError::TokenUnsupported {
            version: ProtocolVersion::V1,
        });
    }

    let (proto, dst) = match header.origin_ip {
        IpAddr::V4(_) => ("TCP4", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        IpAddr::V6(_) => ("TCP6", IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    };
    let line = format!(
        "PROXY {proto} {} {dst} {} 0\r\n",
        header.origin_ip,
        header.origin_port.unwrap_or(0)
    );
    buf.extend_from_slice(line.as_bytes());
    Ok(())
}
