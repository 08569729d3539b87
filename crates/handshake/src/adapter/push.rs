//! Push-model adapter for hosts that hand over inbound chunks through
//! callbacks instead of exposing a readable stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use spoof_guard::RejectReason;

use crate::context::{ConnectionContext, TrustDecision};
use crate::interceptor::{Interceptor, Step};

/// Callbacks into the host's connection object.
pub trait ConnectionHooks {
    /// Replace the address the host reports for this connection. Called at
    /// most once, before any bytes are delivered.
    fn rewrite_origin(&mut self, origin: SocketAddr);

    /// Hand bytes to the host's protocol decoder.
    fn deliver(&mut self, bytes: Bytes);

    /// Tear the connection down without writing to it.
    fn close(&mut self, reason: RejectReason);
}

/// Drives the interceptor for one connection and translates its steps into
/// [`ConnectionHooks`] calls.
pub struct PushAdapter<H> {
    interceptor: Arc<Interceptor>,
    ctx: ConnectionContext,
    hooks: H,
    closed: bool,
}

impl<H: ConnectionHooks> PushAdapter<H> {
    pub fn accept(interceptor: Arc<Interceptor>, peer: SocketAddr, hooks: H) -> Self {
        let ctx = interceptor.on_accept(peer);
        Self {
            interceptor,
            ctx,
            hooks,
            closed: false,
        }
    }

    /// Feed one inbound chunk. Returns false once the connection is closed.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        let was_undecided = self.ctx.is_undecided();
        match self.interceptor.on_bytes(&mut self.ctx, chunk) {
            Step::NeedMore => {}
            Step::Continue(bytes) => {
                if was_undecided {
                    if self.ctx.trust_decision == TrustDecision::Trusted {
                        self.hooks.rewrite_origin(self.ctx.effective_origin_address);
                    }
                    self.interceptor.finalize(&mut self.ctx);
                }
                if !bytes.is_empty() {
                    self.hooks.deliver(bytes);
                }
            }
            Step::Close(reason) => self.close(reason),
        }
        !self.closed
    }

    /// Check the handshake deadline against `now`.
    pub fn poll_deadline(&mut self, now: Instant) -> bool {
        if !self.closed && now >= self.ctx.deadline() {
            if let Some(reason) = self.interceptor.on_timeout(&mut self.ctx) {
                self.close(reason);
            }
        }
        !self.closed
    }

    /// The host saw the peer go away.
    pub fn disconnect(&mut self) {
        if let Some(reason) = self.interceptor.on_disconnect(&mut self.ctx) {
            self.close(reason);
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self, reason: RejectReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.interceptor.finalize(&mut self.ctx);
        self.hooks.close(reason);
    }
}
