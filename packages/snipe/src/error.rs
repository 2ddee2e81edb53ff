//! Error types for the relay, each with a stable machine-readable code.

use std::net::SocketAddr;

/// Outbound send failed. Ends only the relay loop.
#[derive(Debug, Clone, thiserror::Error)]
#[error("send failed: {reason}")]
pub struct SendError {
    pub reason: String,
}

impl SendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> &str {
        "send_failed"
    }
}

/// Inbound read failed. Ends the liveness monitor and with it the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    #[error("read deadline elapsed")]
    Timeout,

    #[error("connection closed: {reason}")]
    Closed { reason: String },

    #[error("protocol violation: payload of {len} bytes exceeds limit of {limit}")]
    ProtocolViolation { len: usize, limit: usize },
}

impl RecvError {
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Closed { .. } => "closed",
            Self::ProtocolViolation { .. } => "protocol_violation",
        }
    }
}

/// An upgrade request that did not become a session. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("a session has already been claimed")]
    SessionUnavailable,

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] axum::Error),
}

impl UpgradeError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::SessionUnavailable => "session_unavailable",
            Self::Handshake(_) => "handshake_failed",
        }
    }
}

/// The listening socket could not be bound. Fatal at startup.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {addr}: {source}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

impl BindError {
    pub fn error_code(&self) -> &str {
        "bind_failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_error_codes() {
        assert_eq!(RecvError::Timeout.error_code(), "timeout");
        assert_eq!(RecvError::closed("peer went away").error_code(), "closed");
        assert_eq!(
            RecvError::ProtocolViolation {
                len: 513,
                limit: 512
            }
            .error_code(),
            "protocol_violation"
        );
    }

    #[test]
    fn protocol_violation_message_names_sizes() {
        let err = RecvError::ProtocolViolation {
            len: 513,
            limit: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("513"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn send_error_carries_reason() {
        let err = SendError::new("broken pipe");
        assert_eq!(err.reason, "broken pipe");
        assert_eq!(err.error_code(), "send_failed");
        assert_eq!(err.to_string(), "send failed: broken pipe");
    }

    #[test]
    fn bind_error_exposes_source() {
        use std::error::Error;

        let err = BindError {
            addr: ([127, 0, 0, 1], 9090).into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.error_code(), "bind_failed");
        assert!(err.to_string().contains("127.0.0.1:9090"));
        assert!(err.source().is_some());
    }

    #[test]
    fn upgrade_error_codes() {
        assert_eq!(
            UpgradeError::SessionUnavailable.error_code(),
            "session_unavailable"
        );
    }
}
