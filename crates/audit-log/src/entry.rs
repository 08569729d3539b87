use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// A single audit log entry representing an event in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeEvent>,
}

impl AuditEntry {
    /// Create a new `AuditEntry` with an auto-generated UUID v4 and the current
    /// UTC timestamp.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            handshake: None,
        }
    }
}

impl From<HandshakeEvent> for AuditEntry {
    fn from(event: HandshakeEvent) -> Self {
        let event_type = match event.outcome {
            HandshakeOutcome::Trusted => AuditEventType::HandshakeTrusted,
            HandshakeOutcome::Rejected => AuditEventType::HandshakeRejected,
            HandshakeOutcome::PassThrough => AuditEventType::HandshakePassthrough,
        };
        let mut source = AuditSource::new("handshake");
        source.remote_addr = Some(event.peer_address.to_string());
        source.session_id = Some(event.connection_id.to_string());

        Self {
            handshake: Some(event),
            ..Self::new(event_type, source, serde_json::Value::Null)
        }
    }
}

/// The category of audit event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    HandshakeTrusted,
    HandshakeRejected,
    HandshakePassthrough,
    UpstreamConnectFailed,
    RegistryReloaded,
    RegistryReloadRejected,
    ProcessStarted,
    ProcessStopped,
}

/// Identifies the component and optional contextual metadata for the event
/// source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditSource {
    /// Convenience constructor that only requires the component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            remote_addr: None,
            session_id: None,
        }
    }
}

/// How a connection's handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeOutcome {
    Trusted,
    Rejected,
    PassThrough,
}

/// Result of one connection's header check.
///
/// `peer_address` is always the literal socket peer; `effective_origin` is
/// only set when the connection was allowed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeEvent {
    pub connection_id: uuid::Uuid,
    pub peer_address: SocketAddr,
    pub outcome: HandshakeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_origin: Option<SocketAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub bytes_consumed: usize,
    pub registry_generation: u64,
}
