//! Bridges between the sans-IO interceptor and concrete I/O models.

pub mod push;
pub mod stream;

pub use push::{ConnectionHooks, PushAdapter};
pub use stream::{intercept, Intercepted, PrefixedStream, Rejection};
