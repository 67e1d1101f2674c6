//! The gateway's error taxonomy.
//!
//! Every fatal error surfaced to the remote client is reduced to a short
//! human-readable message plus one of these numeric codes before the
//! socket is closed (see [`GatewayError::code`]). Recoverable conditions
//! (bad CLI argument with a safe default, unsupported ROP3 falling back
//! to `SRCCOPY`, no matching audio codec) are handled locally by the
//! caller and never become a `GatewayError` at all.

use thiserror::Error;

/// Numeric code carried by the outbound `error` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u16);

/// Abstract error kinds from the gateway's fault model.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A user-provided parameter was missing or malformed and no safe
    /// default could be substituted.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Malformed or out-of-order instruction from either side (e.g. a
    /// reference to an empty cache slot).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Allocation failure, cache overflow, or an out-of-bounds index.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A handshake step, or a steady-state keepalive, exceeded its
    /// allotted window.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A socket write would block; retried locally up to a configured
    /// retry count before being escalated to [`GatewayError::Transport`].
    #[error("transient failure: {0}")]
    Transient(String),

    /// The underlying transport failed after retries were exhausted.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// A requested capability has no handler (an order kind, a codec,
    /// a feature flag). Most `NotSupported` conditions are recovered
    /// locally with a degradation and never reach this variant; it
    /// exists for the cases where no degradation is possible.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl GatewayError {
    /// The numeric code sent to the client alongside this error's
    /// message, before the socket is closed.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadArgument(_) => ErrorCode(0x0100),
            Self::Protocol(_) => ErrorCode(0x0200),
            Self::ResourceExhausted(_) => ErrorCode(0x0300),
            Self::Timeout(_) => ErrorCode(0x0400),
            Self::Transient(_) => ErrorCode(0x0500),
            Self::Transport(_) => ErrorCode(0x0501),
            Self::NotSupported(_) => ErrorCode(0x0600),
        }
    }

    /// Whether this error is fatal to the session. Only
    /// [`GatewayError::Transient`] is not — callers retry it locally.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!GatewayError::Transient("would block".into()).is_fatal());
    }

    #[test]
    fn protocol_errors_are_fatal() {
        assert!(GatewayError::Protocol("empty cache slot".into()).is_fatal());
    }

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(GatewayError::BadArgument("x".into()).code(), ErrorCode(0x0100));
        assert_eq!(GatewayError::Timeout("x".into()).code(), ErrorCode(0x0400));
    }

    #[test]
    fn not_supported_is_fatal_by_default() {
        assert!(GatewayError::NotSupported("no codec negotiated".into()).is_fatal());
    }
}
