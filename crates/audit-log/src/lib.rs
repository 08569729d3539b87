//! Append-only structured JSON-lines audit logging for origin-shield.
//!
//! Every handshake decision and registry reload is recorded as a single
//! newline-terminated JSON object, producing a
//! [JSON Lines](https://jsonlines.org/) stream that is easy to ship, parse,
//! and replay. Submission is non-blocking; a background task owns the file.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/origin-shield/audit.jsonl").await?;
//!
//! sink.log(AuditEntry::new(
//!     AuditEventType::ProcessStarted,
//!     AuditSource::new("origin-shield"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource, HandshakeEvent, HandshakeOutcome};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
