//! Custom error types for the gateway.
//!
//! This module defines the primary error type, `GatewayError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify the failure modes of instrument sessions:
//!
//! - **`Connection`**: the handshake or transport failed while connecting; no
//!   session is created.
//! - **`Io`** / **`Timeout`**: the transport failed (or went silent) while a
//!   session was live. Either of these faults the session.
//! - **`RejectedParameter`**: the instrument NAKed a well-formed request. The
//!   session state is untouched and the caller may retry with other input.
//! - **`InvalidState`**: the operation is not legal in the session's current
//!   lifecycle state (e.g. a status query before connect).
//! - **`ConvergenceTimeout`**: a polled reading failed to stabilize within
//!   the miss budget; carries the last observed value so the caller can
//!   decide whether to proceed anyway.
//! - **`Rejected`**: the per-session command queue overflowed.
//!
//! At the gRPC boundary every error collapses into a `{ok, status}` envelope
//! via [`GatewayError::envelope_message`]; no error variant crosses the wire
//! as a raised fault.

use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Timed out waiting for instrument response: {0}")]
    Timeout(String),

    #[error("Instrument rejected parameter: {0}")]
    RejectedParameter(String),

    #[error("Operation invalid in state {state}: {operation}")]
    InvalidState {
        /// Lifecycle state the session was in when the call arrived.
        state: String,
        /// The operation that was attempted.
        operation: String,
    },

    #[error("Convergence not reached after {misses} misses (last value: {last:?})")]
    ConvergenceTimeout {
        /// Polls that failed to advance convergence.
        misses: u32,
        /// Last valid reading, if any was ever observed.
        last: Option<i64>,
    },

    #[error("Session command queue is full")]
    Rejected,

    #[error("Session is gone: {0}")]
    SessionGone(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl GatewayError {
    /// True when the failure leaves the session unusable (`Faulted`).
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Io(_) | GatewayError::Timeout(_))
    }

    /// Human-readable message for the external `{ok, status}` envelope.
    pub fn envelope_message(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_timeout_are_fatal() {
        assert!(GatewayError::Io("broken pipe".into()).is_fatal());
        assert!(GatewayError::Timeout("no reply in 2s".into()).is_fatal());
    }

    #[test]
    fn rejections_are_not_fatal() {
        assert!(!GatewayError::RejectedParameter("NAK".into()).is_fatal());
        assert!(!GatewayError::Rejected.is_fatal());
        assert!(!GatewayError::InvalidState {
            state: "Disconnected".into(),
            operation: "get_status".into(),
        }
        .is_fatal());
    }

    #[test]
    fn convergence_timeout_reports_last_value() {
        let err = GatewayError::ConvergenceTimeout {
            misses: 4,
            last: Some(18231),
        };
        let msg = err.envelope_message();
        assert!(msg.contains("4 misses"));
        assert!(msg.contains("18231"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::Io(_)));
    }
}
