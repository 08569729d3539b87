//! Pull-model adapter for tokio byte streams.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use spoof_guard::RejectReason;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::context::ConnectionContext;
use crate::interceptor::{Interceptor, Step};

/// A stream whose handshake was allowed through.
#[derive(Debug)]
pub struct Intercepted<S> {
    pub context: ConnectionContext,
    /// Yields the bytes that followed the header, then the rest of the socket.
    pub stream: PrefixedStream<S>,
}

/// A stream whose handshake was refused. The socket has already been
/// dropped; nothing was written to it.
#[derive(Debug, thiserror::Error)]
#[error("handshake from {} rejected: {reason}", .context.raw_peer_address)]
pub struct Rejection {
    pub context: ConnectionContext,
    pub reason: RejectReason,
}

/// Run the handshake over `stream`, reading at most the probe budget and
/// giving up at the context deadline.
pub async fn intercept<S>(
    interceptor: &Interceptor,
    mut stream: S,
    peer: SocketAddr,
) -> Result<Intercepted<S>, Rejection>
where
    S: AsyncRead + Unpin,
{
    let mut ctx = interceptor.on_accept(peer);
    let deadline = tokio::time::Instant::from_std(ctx.deadline());
    let mut buf = vec![0u8; interceptor.config().max_probe_bytes];

    loop {
        let want = interceptor.remaining_probe(&ctx).clamp(1, buf.len());
        let step = match tokio::time::timeout_at(deadline, stream.read(&mut buf[..want])).await {
            Ok(Ok(0)) => {
                let reason = interceptor
                    .on_disconnect(&mut ctx)
                    .unwrap_or(RejectReason::UnexpectedDisconnect);
                Step::Close(reason)
            }
            Ok(Ok(n)) => interceptor.on_bytes(&mut ctx, &buf[..n]),
            Ok(Err(err)) => {
                debug!(connection_id = %ctx.id, %err, "read failed during handshake");
                let reason = interceptor
                    .on_disconnect(&mut ctx)
                    .unwrap_or(RejectReason::UnexpectedDisconnect);
                Step::Close(reason)
            }
            Err(_) => {
                let reason = interceptor
                    .on_timeout(&mut ctx)
                    .unwrap_or(RejectReason::HandshakeTimeout);
                Step::Close(reason)
            }
        };

        match step {
            Step::NeedMore => continue,
            Step::Continue(prefix) => {
                interceptor.finalize(&mut ctx);
                return Ok(Intercepted {
                    context: ctx,
                    stream: PrefixedStream::new(prefix, stream),
                });
            }
            Step::Close(reason) => {
                interceptor.finalize(&mut ctx);
                return Err(Rejection {
                    context: ctx,
                    reason,
                });
            }
        }
    }
}

/// Replays `prefix` before reading from the wrapped stream. Writes go
/// straight through.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes still waiting to be replayed.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_parts(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
