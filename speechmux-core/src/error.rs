use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// All synchronous errors produced by speechmux-core.
///
/// Asynchronous session failures never show up here; they reach the caller
/// exactly once through the kind's `on_error` callback as an [`ErrorCode`].
#[derive(Debug, Error)]
pub enum SpeechMuxError {
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine is not prepared")]
    NotPrepared,

    #[error("engine refused to open a session (returned id {code})")]
    AllocationFailed { code: i32 },

    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SpeechMuxError>;

/// Session error codes reported by the engine in `error` events.
///
/// Values below 100 originate at the backend service, values from 101 up are
/// raised on the client side of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    Unauthenticated,
    ConnectionExceed,
    ServerResourceExhausted,
    ServerBusy,
    ServerInternal,
    ServiceUnavailable,
    SdkClosed,
    Timeout,
    Unknown,
    /// Any code this layer has no name for. Passed through untouched.
    Other(i32),
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Unauthenticated => 2,
            ErrorCode::ConnectionExceed => 3,
            ErrorCode::ServerResourceExhausted => 4,
            ErrorCode::ServerBusy => 5,
            ErrorCode::ServerInternal => 6,
            ErrorCode::ServiceUnavailable => 101,
            ErrorCode::SdkClosed => 102,
            ErrorCode::Timeout => 103,
            ErrorCode::Unknown => 104,
            ErrorCode::Other(code) => code,
        }
    }

    /// Stable upper-snake-case name used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::ConnectionExceed => "CONNECTION_EXCEED",
            ErrorCode::ServerResourceExhausted => "SERVER_RESOURCE_EXHAUSTED",
            ErrorCode::ServerBusy => "SERVER_BUSY",
            ErrorCode::ServerInternal => "SERVER_INTERNAL",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::SdkClosed => "SDK_CLOSED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Other(_) => "OTHER",
        }
    }

    /// Whether the failure happened on the client side of the engine
    /// (connection loss, local timeout) rather than at the backend.
    pub fn is_client_side(self) -> bool {
        self.code() > 100
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            2 => ErrorCode::Unauthenticated,
            3 => ErrorCode::ConnectionExceed,
            4 => ErrorCode::ServerResourceExhausted,
            5 => ErrorCode::ServerBusy,
            6 => ErrorCode::ServerInternal,
            101 => ErrorCode::ServiceUnavailable,
            102 => ErrorCode::SdkClosed,
            103 => ErrorCode::Timeout,
            104 => ErrorCode::Unknown,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_named_variants() {
        assert_eq!(ErrorCode::from(2), ErrorCode::Unauthenticated);
        assert_eq!(ErrorCode::from(5), ErrorCode::ServerBusy);
        assert_eq!(ErrorCode::from(103), ErrorCode::Timeout);
        assert_eq!(ErrorCode::ServerInternal.code(), 6);
        assert!(ErrorCode::SdkClosed.is_client_side());
        assert!(!ErrorCode::ServerBusy.is_client_side());
    }

    #[test]
    fn unknown_codes_pass_through() {
        let code = ErrorCode::from(42);
        assert_eq!(code, ErrorCode::Other(42));
        assert_eq!(i32::from(code), 42);
        assert_eq!(code.to_string(), "OTHER (42)");
    }

    #[test]
    fn error_code_serializes_as_integer() {
        let json = serde_json::to_value(ErrorCode::ServiceUnavailable).expect("serialize code");
        assert_eq!(json, 101);
        let parsed: ErrorCode = serde_json::from_str("4").expect("deserialize code");
        assert_eq!(parsed, ErrorCode::ServerResourceExhausted);
    }
}
