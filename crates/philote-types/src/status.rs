//! Call completion status carried in the final frame of every call.
//!
//! Codes mirror the subset of gRPC status codes the protocol actually emits.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Status Code ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok                 => write!(f, "ok"),
            Self::Cancelled          => write!(f, "cancelled"),
            Self::InvalidArgument    => write!(f, "invalid-argument"),
            Self::DeadlineExceeded   => write!(f, "deadline-exceeded"),
            Self::FailedPrecondition => write!(f, "failed-precondition"),
            Self::Unimplemented      => write!(f, "unimplemented"),
            Self::Internal           => write!(f, "internal"),
            Self::Unavailable        => write!(f, "unavailable"),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}
