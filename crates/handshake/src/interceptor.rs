use std::net::SocketAddr;
use std::time::Instant;

use audit_log::{AuditSink, HandshakeEvent, HandshakeOutcome};
use bytes::{Bytes, BytesMut};
use peer_registry::RegistryHandle;
use relay_header::{declared_len, try_parse, ParseOutcome};
use spoof_guard::{decide, Decision, GuardConfig, GuardConfigError, RejectReason};
use tracing::{debug, info, trace, warn};

use crate::context::{ConnectionContext, HandshakeState, TrustDecision};

/// What the host should do after feeding bytes to the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading; nothing may be forwarded yet.
    NeedMore,
    /// Forward these bytes downstream. Empty when the chunk held only header
    /// bytes.
    Continue(Bytes),
    /// Close the connection without writing anything back.
    Close(RejectReason),
}

/// Sans-IO handshake state machine.
///
/// One `Interceptor` is shared by every connection on a listener. It holds
/// the registry handle, the guard policy and the audit sink; per-connection
/// state lives in the [`ConnectionContext`] returned by
/// [`on_accept`](Self::on_accept).
#[derive(Debug, Clone)]
pub struct Interceptor {
    registry: RegistryHandle,
    config: GuardConfig,
    audit: AuditSink,
}

impl Interceptor {
    pub fn new(registry: RegistryHandle, config: GuardConfig) -> Result<Self, GuardConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            audit: AuditSink::disabled(),
        })
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Start tracking a freshly accepted connection. Captures the registry
    /// snapshot the connection will be judged against.
    pub fn on_accept(&self, raw_peer: SocketAddr) -> ConnectionContext {
        let now = Instant::now();
        let ctx = ConnectionContext::new(
            raw_peer,
            self.registry.snapshot(),
            now,
            now + self.config.handshake_timeout,
            self.config.max_probe_bytes,
        );
        debug!(
            connection_id = %ctx.id,
            peer = %raw_peer,
            generation = ctx.snapshot.generation(),
            "connection accepted"
        );
        ctx
    }

    /// How many more bytes the probe buffer can take. Zero once decided.
    pub fn remaining_probe(&self, ctx: &ConnectionContext) -> usize {
        if ctx.is_undecided() {
            self.config.max_probe_bytes.saturating_sub(ctx.probe.len())
        } else {
            0
        }
    }

    /// Feed the next chunk read from the connection.
    pub fn on_bytes(&self, ctx: &mut ConnectionContext, chunk: &[u8]) -> Step {
        if !ctx.is_undecided() {
            return match ctx.trust_decision {
                TrustDecision::Rejected => {
                    Step::Close(ctx.reject_reason.unwrap_or(RejectReason::HeaderMalformed))
                }
                _ => Step::Continue(Bytes::copy_from_slice(chunk)),
            };
        }

        let room = self.remaining_probe(ctx);
        let (taken, overflow) = chunk.split_at(room.min(chunk.len()));
        ctx.probe.extend_from_slice(taken);
        ctx.state = HandshakeState::HeaderCheck;

        let outcome = try_parse(&ctx.probe);
        trace!(
            connection_id = %ctx.id,
            buffered = ctx.probe.len(),
            ?outcome,
            "probed handshake bytes"
        );

        if outcome == ParseOutcome::Incomplete {
            let max = self.config.max_probe_bytes;
            let oversize = declared_len(&ctx.probe).is_some_and(|len| len > max);
            if oversize || ctx.probe.len() >= max {
                return Step::Close(self.reject(ctx, RejectReason::ProbeLimitExceeded));
            }
            ctx.state = HandshakeState::AwaitingBytes;
            return Step::NeedMore;
        }

        match decide(&ctx.snapshot, &self.config, ctx.raw_peer_address, &outcome) {
            Decision::Trust { origin, label } => {
                let (header, consumed) = match outcome {
                    ParseOutcome::Present { header, consumed } => (header, consumed),
                    _ => return Step::Close(self.reject(ctx, RejectReason::HeaderMalformed)),
                };
                ctx.effective_origin_address = origin;
                ctx.trust_decision = TrustDecision::Trusted;
                ctx.raw_bytes_consumed = consumed;
                ctx.header = Some(header);
                ctx.matched_label = Some(label);
                ctx.state = HandshakeState::Trusted;

                info!(
                    connection_id = %ctx.id,
                    peer = %ctx.raw_peer_address,
                    origin = %origin,
                    label = ctx.matched_label.as_deref().unwrap_or_default(),
                    "relay header trusted"
                );
                self.emit(ctx, HandshakeOutcome::Trusted);
                Step::Continue(drain_probe(ctx, consumed, overflow))
            }
            Decision::PassThrough => {
                ctx.state = HandshakeState::PassThrough;
                debug!(
                    connection_id = %ctx.id,
                    peer = %ctx.raw_peer_address,
                    "no relay header; passing through"
                );
                self.emit(ctx, HandshakeOutcome::PassThrough);
                Step::Continue(drain_probe(ctx, 0, overflow))
            }
            Decision::Reject(reason) => Step::Close(self.reject(ctx, reason)),
        }
    }

    /// The handshake deadline passed. Returns the rejection if the connection
    /// was still undecided.
    pub fn on_timeout(&self, ctx: &mut ConnectionContext) -> Option<RejectReason> {
        if !ctx.is_undecided() {
            return None;
        }
        Some(self.reject(ctx, RejectReason::HandshakeTimeout))
    }

    /// The peer closed or errored. An undecided handshake is abandoned;
    /// bytes already buffered mean the header itself was cut short.
    pub fn on_disconnect(&self, ctx: &mut ConnectionContext) -> Option<RejectReason> {
        if !ctx.is_undecided() {
            return None;
        }
        let reason = if ctx.probe.is_empty() {
            RejectReason::UnexpectedDisconnect
        } else {
            RejectReason::HeaderMalformed
        };
        Some(self.reject(ctx, reason))
    }

    /// Mark the handshake complete. Further bytes still follow the decision
    /// already made.
    pub fn finalize(&self, ctx: &mut ConnectionContext) {
        if ctx.is_undecided() {
            self.reject(ctx, RejectReason::UnexpectedDisconnect);
        }
        ctx.state = HandshakeState::Finalized;
        ctx.probe = BytesMut::new();
        debug!(
            connection_id = %ctx.id,
            decision = ?ctx.trust_decision,
            elapsed_ms = ctx.accepted_at.elapsed().as_millis() as u64,
            "handshake finalized"
        );
    }

    fn reject(&self, ctx: &mut ConnectionContext, reason: RejectReason) -> RejectReason {
        ctx.trust_decision = TrustDecision::Rejected;
        ctx.reject_reason = Some(reason);
        ctx.state = HandshakeState::Rejected;
        ctx.probe.clear();

        warn!(
            connection_id = %ctx.id,
            peer = %ctx.raw_peer_address,
            reason = reason.code(),
            "handshake rejected"
        );
        self.emit(ctx, HandshakeOutcome::Rejected);
        reason
    }

    fn emit(&self, ctx: &ConnectionContext, outcome: HandshakeOutcome) {
        let allowed = outcome != HandshakeOutcome::Rejected;
        self.audit.record(HandshakeEvent {
            connection_id: ctx.id,
            peer_address: ctx.raw_peer_address,
            outcome,
            reason_code: ctx.reject_reason.map(|r| r.code().to_string()),
            effective_origin: allowed.then_some(ctx.effective_origin_address),
            label: ctx.matched_label.clone(),
            bytes_consumed: ctx.raw_bytes_consumed,
            registry_generation: ctx.snapshot.generation(),
        });
    }
}

/// Bytes owed downstream once a decision lets the connection through:
/// everything buffered after the header, then whatever did not fit.
fn drain_probe(ctx: &mut ConnectionContext, consumed: usize, overflow: &[u8]) -> Bytes {
    let mut probe = std::mem::take(&mut ctx.probe);
    let mut rest = probe.split_off(consumed);
    rest.extend_from_slice(overflow);
    rest.freeze()
}
