//! Binary (version 2) relay header.
//!
//! ```text
//! +--------------------+---------+-----+--------+---------------+------+
//! | signature (12)     | ver_cmd | fam | len(2) | addresses     | TLVs |
//! +--------------------+---------+-----+--------+---------------+------+
//! ```
//!
//! The signature contains a NUL and an embedded `QUIT\n`, so it cannot be
//! the start of HTTP, TLS, SSH or any length-prefixed binary protocol.
//!
//! Framing happens here on the raw bytes; the body is decoded and built by
//! `ppp`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Bytes, BytesMut};
use ppp::v2::{self as ppp_v2, Builder, Command, Protocol, Version};

use crate::error::{EncodeError, MalformedReason};
use crate::header::RelayHeader;

/// Fixed 12-byte signature opening every v2 header.
pub const SIGNATURE: [u8; 12] = *b"\r\n\r\n\0\r\nQUIT\n";

/// Signature, version/command, family and length.
pub const MIN_LEN: usize = 16;

/// TLV type carrying the relay authentication token. Taken from the range
/// reserved for application-specific use (0xE0..=0xEF).
pub const TOKEN_TLV: u8 = 0xE0;

/// TLV type that receivers must ignore.
pub const NOOP_TLV: u8 = 0x04;

const VERSION: u8 = 0x2;
const CMD_PROXY: u8 = 0x1;

const TCP_OVER_IPV4: u8 = 0x11;
const TCP_OVER_IPV6: u8 = 0x21;

const IPV4_BLOCK_LEN: usize = 12;
const IPV6_BLOCK_LEN: usize = 36;
const TLV_HEADER_LEN: usize = 3;

/// Total header length once the fixed part is buffered.
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < MIN_LEN || buf[..SIGNATURE.len()] != SIGNATURE {
        return None;
    }
    let len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    Some(MIN_LEN + len)
}

/// Length of the header at the start of `buf`, which is known to begin with
/// [`SIGNATURE`]. `Ok(None)` means more bytes are needed.
///
/// Only PROXY commands over TCP/IPv4 or TCP/IPv6 get this far: LOCAL carries
/// no client address, so there is nothing to trust.
pub(crate) fn frame(buf: &[u8]) -> Result<Option<usize>, MalformedReason> {
    if buf.len() < MIN_LEN {
        return Ok(None);
    }

    let version = buf[12] >> 4;
    if version != VERSION {
        return Err(MalformedReason::UnsupportedVersion(version));
    }
    let command = buf[12] & 0x0F;
    if command != CMD_PROXY {
        return Err(MalformedReason::UnsupportedCommand(command));
    }

    let required = match buf[13] {
        TCP_OVER_IPV4 => IPV4_BLOCK_LEN,
        TCP_OVER_IPV6 => IPV6_BLOCK_LEN,
        other => return Err(MalformedReason::UnsupportedFamily(other)),
    };

    let declared = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    if declared < required {
        return Err(MalformedReason::LengthTooShort { declared, required });
    }

    let total = MIN_LEN + declared;
    Ok((buf.len() >= total).then_some(total))
}

/// Pull the token out of the TLV area, skipping every other type.
pub(crate) fn read_token(header: &ppp_v2::Header<'_>) -> Result<Option<Bytes>, MalformedReason> {
    let mut token = None;

    for tlv in header.tlvs() {
        let tlv = tlv.map_err(|_| MalformedReason::TruncatedTlv)?;
        if tlv.kind != TOKEN_TLV {
            continue;
        }
        if token.is_some() {
            return Err(MalformedReason::DuplicateToken);
        }
        token = Some(Bytes::copy_from_slice(&tlv.value));
    }

    Ok(token)
}

fn block_len(origin: IpAddr) -> usize {
    match origin {
        IpAddr::V4(_) => IPV4_BLOCK_LEN,
        IpAddr::V6(_) => IPV6_BLOCK_LEN,
    }
}

/// Largest token a v2 header announcing `origin` can carry: the 16-bit
/// length field also covers the address block and the TLV's own header.
pub fn max_token_len(origin: IpAddr) -> usize {
    usize::from(u16::MAX) - block_len(origin) - TLV_HEADER_LEN
}

/// Append the v2 encoding of `header`. The destination is written as the
/// unspecified address with port 0.
pub(crate) fn write(header: &RelayHeader, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if let Some(token) = &header.auth_token {
        if token.len() > max_token_len(header.origin_ip) {
            return Err(EncodeError::TokenTooLong { len: token.len() });
        }
    }

    let unspecified = match header.origin_ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let source = SocketAddr::new(header.origin_ip, header.origin_port.unwrap_or(0));
    let destination = SocketAddr::new(unspecified, 0);

    let mut builder = Builder::with_addresses(
        Version::Two | Command::Proxy,
        Protocol::Stream,
        (source, destination),
    );
    if let Some(token) = &header.auth_token {
        builder = builder
            .write_tlv(TOKEN_TLV, &token[..])
            .map_err(|err| EncodeError::Write(err.to_string()))?;
    }
    let encoded = builder
        .build()
        .map_err(|err| EncodeError::Write(err.to_string()))?;

    buf.extend_from_slice(&encoded);
    Ok(())
}
