// Protocol-wide error taxonomy. Every failure that can cross a call boundary
// maps onto exactly one variant and, from there, onto one status code.

use std::time::Duration;

use crate::status::{Status, StatusCode};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhiloteError {
    // ── Request shape ─────────────────────────────────────────────────────

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bounds error: {0}")]
    Bounds(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("configuration error: {0}")]
    Config(String),

    // ── Discipline callbacks ──────────────────────────────────────────────

    #[error("{hook} failed: {message}")]
    Callback { hook: String, message: String },

    // ── Transport ─────────────────────────────────────────────────────────

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("RPC timeout after {timeout_ms}ms: {message}")]
    Timeout { timeout_ms: u64, message: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("RPC failed [{code}]: {message}")]
    Rpc { code: StatusCode, message: String },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PhiloteError>;

impl PhiloteError {
    pub fn callback(hook: &str, message: impl Into<String>) -> Self {
        Self::Callback { hook: hook.to_string(), message: message.into() }
    }

    /// Status code reported to the remote side when this error ends a call.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_)
            | Self::NotFound(_)
            | Self::Bounds(_)
            | Self::Config(_) => StatusCode::InvalidArgument,
            Self::Precondition(_) => StatusCode::FailedPrecondition,
            Self::Callback { .. }
            | Self::Transport(_)
            | Self::Serialization(_) => StatusCode::Internal,
            Self::Timeout { .. } => StatusCode::DeadlineExceeded,
            Self::Cancelled(_) => StatusCode::Cancelled,
            Self::Rpc { code, .. } => *code,
        }
    }

    /// Classify a non-OK completion seen by a client.
    ///
    /// `timeout` is the deadline the client configured for the call; it is
    /// embedded in the message when the call ran out of time.
    pub fn from_status(status: Status, timeout: Duration) -> Self {
        match status.code {
            StatusCode::DeadlineExceeded => Self::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                message: status.message,
            },
            StatusCode::Cancelled => Self::Cancelled(status.message),
            StatusCode::Unavailable => Self::Transport(status.message),
            code => Self::Rpc { code, message: status.message },
        }
    }
}

impl From<PhiloteError> for Status {
    fn from(err: PhiloteError) -> Self {
        let code = err.status_code();
        Status::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_exceeded_embeds_configured_timeout() {
        let status = Status::deadline_exceeded("deadline exceeded");
        let err = PhiloteError::from_status(status, Duration::from_millis(1234));
        assert!(matches!(err, PhiloteError::Timeout { timeout_ms: 1234, .. }));
        assert!(err.to_string().contains("1234"));
    }

    #[test]
    fn oversized_timeout_saturates() {
        let status = Status::deadline_exceeded("deadline exceeded");
        let err = PhiloteError::from_status(status, Duration::MAX);
        assert!(matches!(err, PhiloteError::Timeout { timeout_ms: u64::MAX, .. }));
    }

    #[test]
    fn other_codes_keep_code_and_message() {
        let status = Status::invalid_argument("Variable not found: z");
        let err = PhiloteError::from_status(status, Duration::from_secs(60));
        assert_eq!(
            err,
            PhiloteError::Rpc {
                code: StatusCode::InvalidArgument,
                message: "Variable not found: z".into(),
            }
        );
        assert!(err.to_string().contains("invalid-argument"));
    }

    #[test]
    fn server_side_classification() {
        let cases = [
            (PhiloteError::Protocol("x".into()), StatusCode::InvalidArgument),
            (PhiloteError::Bounds("x".into()), StatusCode::InvalidArgument),
            (PhiloteError::Precondition("x".into()), StatusCode::FailedPrecondition),
            (PhiloteError::callback("compute", "boom"), StatusCode::Internal),
            (PhiloteError::Cancelled("x".into()), StatusCode::Cancelled),
        ];
        for (err, code) in cases {
            let status: Status = err.into();
            assert_eq!(status.code, code);
        }
    }

    #[test]
    fn callback_message_names_the_hook() {
        let status: Status = PhiloteError::callback("setup", "bad shape").into();
        assert_eq!(status.message, "setup failed: bad shape");
    }
}
