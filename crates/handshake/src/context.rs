use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use peer_registry::RegistrySnapshot;
use relay_header::RelayHeader;
use spoof_guard::RejectReason;

/// Whether the connection's origin has been vouched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// No trusted header (yet). The origin is the socket peer.
    Unverified,
    /// A registered relay announced the origin.
    Trusted,
    /// The handshake failed; the connection must be closed.
    Rejected,
}

/// Position in the handshake state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingBytes,
    HeaderCheck,
    Trusted,
    Rejected,
    PassThrough,
    Finalized,
}

/// Per-connection handshake record, owned by the connection's task.
#[derive(Debug)]
pub struct ConnectionContext {
    pub id: uuid::Uuid,
    /// Literal address of the socket peer. Never changes.
    pub raw_peer_address: SocketAddr,
    /// Address the rest of the system should treat as the client. Equal to
    /// `raw_peer_address` unless a trusted header rewrote it.
    pub effective_origin_address: SocketAddr,
    pub trust_decision: TrustDecision,
    /// Header bytes stripped from the front of the stream.
    pub raw_bytes_consumed: usize,
    pub state: HandshakeState,
    pub header: Option<RelayHeader>,
    pub matched_label: Option<String>,
    pub reject_reason: Option<RejectReason>,
    /// Registry view captured at accept; later reloads do not affect it.
    pub snapshot: Arc<RegistrySnapshot>,
    pub accepted_at: Instant,
    pub(crate) deadline: Instant,
    pub(crate) probe: BytesMut,
}

impl ConnectionContext {
    pub(crate) fn new(
        raw_peer_address: SocketAddr,
        snapshot: Arc<RegistrySnapshot>,
        accepted_at: Instant,
        deadline: Instant,
        probe_capacity: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            raw_peer_address,
            effective_origin_address: raw_peer_address,
            trust_decision: TrustDecision::Unverified,
            raw_bytes_consumed: 0,
            state: HandshakeState::AwaitingBytes,
            header: None,
            matched_label: None,
            reject_reason: None,
            snapshot,
            accepted_at,
            deadline,
            probe: BytesMut::with_capacity(probe_capacity),
        }
    }

    /// True until a trust, pass-through or reject decision has been made.
    pub fn is_undecided(&self) -> bool {
        matches!(
            self.state,
            HandshakeState::AwaitingBytes | HandshakeState::HeaderCheck
        )
    }

    /// Point in time by which the header decision must be made.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Bytes currently held while waiting for a decision.
    pub fn buffered(&self) -> usize {
        self.probe.len()
    }
}
