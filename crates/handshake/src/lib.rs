//! Relay-header handshake interception for origin-shield.
//!
//! This crate inspects the first bytes of each inbound connection, extracts
//! the client address announced by a trusted upstream relay, and rewrites
//! the connection's effective origin before the wrapped protocol sees any
//! bytes. Connections presenting forged or unauthorized headers are closed
//! without a reply.
//!
//! # Architecture
//!
//! ```text
//! Relay  --TCP-->  adapter  --bytes-->  Interceptor  --outcome-->  spoof_guard::decide
//!                     |                      |                            |
//!               PrefixedStream        ConnectionContext            RegistrySnapshot
//!                     |
//!                 upstream
//! ```
//!
//! [`Interceptor`] is a sans-IO state machine driven through
//! `on_accept` / `on_bytes` / `on_timeout` / `on_disconnect` / `finalize`.
//! [`adapter::stream`] drives it over any tokio `AsyncRead`,
//! [`adapter::push`] over callback-style hosts, and [`listener::Shield`] is
//! a complete forwarding listener built on the stream adapter.

pub mod adapter;
pub mod context;
pub mod interceptor;
pub mod listener;

pub use adapter::{intercept, ConnectionHooks, Intercepted, PrefixedStream, PushAdapter, Rejection};
pub use context::{ConnectionContext, HandshakeState, TrustDecision};
pub use interceptor::{Interceptor, Step};
pub use listener::{Shield, ShieldConfig, ShieldStats, UpstreamHeader};
