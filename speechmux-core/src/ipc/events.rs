//! Event types flowing out of the engine and out of the handle.
//!
//! | Type | Producer | Consumer |
//! |------|----------|----------|
//! | `EngineEvent` | engine thread (push) or `Engine::poll` (pull) | dispatcher |
//! | `HandleStatusEvent` | `EngineHandle` | `Client::subscribe_status` receivers |
//!
//! Both derive `serde` so hosts can forward them over their own transport.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Engine events
// ---------------------------------------------------------------------------

/// One record emitted by the engine for a session.
///
/// `id` is the raw engine id. The dispatcher discards non-positive ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub id: i32,
    pub kind: EventKind,
}

/// Discriminated event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// The engine began producing results for the session.
    Started,
    /// Streaming recognition hypothesis. `extra` carries engine-specific
    /// side data in combined mode and is usually empty.
    Intermediate {
        text: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        extra: String,
    },
    /// Final transcript of a combined session; intent resolution follows.
    AsrFinished { text: String },
    /// Synthesized audio bytes.
    VoiceChunk { data: Vec<u8> },
    /// Terminal: the session finished successfully.
    Completed {
        #[serde(default)]
        result: Completion,
    },
    /// Terminal: the session was cancelled.
    Cancelled,
    /// Terminal: the session failed.
    Error { code: ErrorCode },
}

/// Final payload of a completed session. Fields a kind does not produce stay
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Completion {
    pub asr: String,
    pub nlp: String,
    pub action: String,
}

impl EventKind {
    /// Completed, cancelled and error end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Completed { .. } | EventKind::Cancelled | EventKind::Error { .. }
        )
    }

    /// Short label for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Intermediate { .. } => "intermediate",
            EventKind::AsrFinished { .. } => "asr_finished",
            EventKind::VoiceChunk { .. } => "voice_chunk",
            EventKind::Completed { .. } => "completed",
            EventKind::Cancelled => "cancelled",
            EventKind::Error { .. } => "error",
        }
    }
}

impl EngineEvent {
    pub fn new(id: i32, kind: EventKind) -> Self {
        Self { id, kind }
    }

    pub fn started(id: i32) -> Self {
        Self::new(id, EventKind::Started)
    }

    pub fn intermediate(id: i32, text: impl Into<String>) -> Self {
        Self::new(
            id,
            EventKind::Intermediate {
                text: text.into(),
                extra: String::new(),
            },
        )
    }

    pub fn asr_finished(id: i32, text: impl Into<String>) -> Self {
        Self::new(id, EventKind::AsrFinished { text: text.into() })
    }

    pub fn voice_chunk(id: i32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(id, EventKind::VoiceChunk { data: data.into() })
    }

    pub fn completed(id: i32, result: Completion) -> Self {
        Self::new(id, EventKind::Completed { result })
    }

    pub fn cancelled(id: i32) -> Self {
        Self::new(id, EventKind::Cancelled)
    }

    pub fn error(id: i32, code: ErrorCode) -> Self {
        Self::new(id, EventKind::Error { code })
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Handle status events
// ---------------------------------------------------------------------------

/// Broadcast whenever the engine handle changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleStatusEvent {
    pub status: HandleStatus,
    /// Optional human-readable detail (e.g. why prepare failed).
    pub detail: Option<String>,
}

/// Lifecycle state of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleStatus {
    /// Created and possibly configured, `prepare()` not yet called.
    Created,
    /// Accepting requests.
    Prepared,
    /// Released; requests fail until the next successful `prepare()`.
    Released,
    /// `prepare()` failed. Requests fail fast.
    Unavailable,
    /// Destroyed. Terminal.
    Destroyed,
}
