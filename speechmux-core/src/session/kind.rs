//! Request kinds and their callback capability sets.
//!
//! Recognition, synthesis, combined and intent-only sessions share one
//! controller, one registry and one dispatcher. What differs per kind is captured here:
//! the callback trait object the registry stores, which inputs the kind
//! accepts, and how an [`EventKind`] maps onto callback methods.

use crate::error::ErrorCode;
use crate::ipc::events::{Completion, EventKind};
use crate::session::SessionId;

/// Outcome of translating one event for one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// A callback method ran.
    Invoked,
    /// The event carried nothing worth delivering (empty intermediate).
    Suppressed,
    /// The event kind has no meaning for this request kind.
    Unsupported,
}

/// A family of requests sharing one callback contract.
pub trait RequestKind: Send + Sync + 'static {
    /// Callback trait object stored in the registry.
    type Callback: ?Sized + Send + Sync + 'static;

    /// Label for log fields and thread names.
    const NAME: &'static str;

    /// Map `event` onto `callback`. Runs on the dispatch thread without the
    /// registry lock held.
    fn translate(callback: &Self::Callback, id: SessionId, event: &EventKind) -> Translation;
}

/// Kinds that accept streamed voice input.
pub trait VoiceInput: RequestKind {}

/// Kinds that accept a text submission.
pub trait TextInput: RequestKind {}

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

/// Speech recognition only.
#[derive(Debug)]
pub enum Asr {}

pub trait AsrCallback: Send + Sync {
    fn on_start(&self, _id: SessionId) {}

    fn on_intermediate_result(&self, _id: SessionId, _text: &str) {}

    /// Final transcript.
    fn on_complete(&self, _id: SessionId, _text: &str) {}

    fn on_cancel(&self, _id: SessionId) {}

    fn on_error(&self, _id: SessionId, _code: ErrorCode) {}
}

impl RequestKind for Asr {
    type Callback = dyn AsrCallback;
    const NAME: &'static str = "asr";

    fn translate(cb: &Self::Callback, id: SessionId, event: &EventKind) -> Translation {
        match event {
            EventKind::Started => cb.on_start(id),
            EventKind::Intermediate { text, .. } => {
                if text.is_empty() {
                    return Translation::Suppressed;
                }
                cb.on_intermediate_result(id, text);
            }
            EventKind::Completed { result } => cb.on_complete(id, &result.asr),
            EventKind::Cancelled => cb.on_cancel(id),
            EventKind::Error { code } => cb.on_error(id, *code),
            EventKind::AsrFinished { .. } | EventKind::VoiceChunk { .. } => {
                return Translation::Unsupported
            }
        }
        Translation::Invoked
    }
}

impl VoiceInput for Asr {}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Text-to-speech only.
#[derive(Debug)]
pub enum Tts {}

pub trait TtsCallback: Send + Sync {
    fn on_start(&self, _id: SessionId) {}

    /// Synthesized audio in the configured codec.
    fn on_voice_chunk(&self, _id: SessionId, _data: &[u8]) {}

    fn on_complete(&self, _id: SessionId) {}

    fn on_cancel(&self, _id: SessionId) {}

    fn on_error(&self, _id: SessionId, _code: ErrorCode) {}
}

impl RequestKind for Tts {
    type Callback = dyn TtsCallback;
    const NAME: &'static str = "tts";

    fn translate(cb: &Self::Callback, id: SessionId, event: &EventKind) -> Translation {
        match event {
            EventKind::Started => cb.on_start(id),
            EventKind::VoiceChunk { data } => cb.on_voice_chunk(id, data),
            EventKind::Completed { .. } => cb.on_complete(id),
            EventKind::Cancelled => cb.on_cancel(id),
            EventKind::Error { code } => cb.on_error(id, *code),
            EventKind::Intermediate { .. } | EventKind::AsrFinished { .. } => {
                return Translation::Unsupported
            }
        }
        Translation::Invoked
    }
}

impl TextInput for Tts {}

// ---------------------------------------------------------------------------
// Combined
// ---------------------------------------------------------------------------

/// Recognition → intent resolution → synthesis.
#[derive(Debug)]
pub enum Speech {}

pub trait SpeechCallback: Send + Sync {
    fn on_start(&self, _id: SessionId) {}

    fn on_intermediate_result(&self, _id: SessionId, _asr: &str, _extra: &str) {}

    /// Recognition finished; intent resolution is still running.
    fn on_asr_complete(&self, _id: SessionId, _asr: &str) {}

    fn on_voice_chunk(&self, _id: SessionId, _data: &[u8]) {}

    fn on_complete(&self, _id: SessionId, _result: &Completion) {}

    fn on_cancel(&self, _id: SessionId) {}

    fn on_error(&self, _id: SessionId, _code: ErrorCode) {}
}

impl RequestKind for Speech {
    type Callback = dyn SpeechCallback;
    const NAME: &'static str = "speech";

    fn translate(cb: &Self::Callback, id: SessionId, event: &EventKind) -> Translation {
        match event {
            EventKind::Started => cb.on_start(id),
            EventKind::Intermediate { text, extra } => {
                if text.is_empty() && extra.is_empty() {
                    return Translation::Suppressed;
                }
                cb.on_intermediate_result(id, text, extra);
            }
            EventKind::AsrFinished { text } => cb.on_asr_complete(id, text),
            EventKind::VoiceChunk { data } => cb.on_voice_chunk(id, data),
            EventKind::Completed { result } => cb.on_complete(id, result),
            EventKind::Cancelled => cb.on_cancel(id),
            EventKind::Error { code } => cb.on_error(id, *code),
        }
        Translation::Invoked
    }
}

impl VoiceInput for Speech {}
impl TextInput for Speech {}

// ---------------------------------------------------------------------------
// Intent resolution
// ---------------------------------------------------------------------------

/// Intent resolution for a transcript the caller already has. No audio in
/// either direction and no progress events: a request ends in exactly one of
/// `on_nlp`, `on_cancel` or `on_error`.
#[derive(Debug)]
pub enum Nlp {}

pub trait NlpCallback: Send + Sync {
    /// Resolved intent, as the engine's JSON document.
    fn on_nlp(&self, _id: SessionId, _nlp: &str) {}

    fn on_cancel(&self, _id: SessionId) {}

    fn on_error(&self, _id: SessionId, _code: ErrorCode) {}
}

impl RequestKind for Nlp {
    type Callback = dyn NlpCallback;
    const NAME: &'static str = "nlp";

    fn translate(cb: &Self::Callback, id: SessionId, event: &EventKind) -> Translation {
        match event {
            EventKind::Completed { result } => cb.on_nlp(id, &result.nlp),
            EventKind::Cancelled => cb.on_cancel(id),
            EventKind::Error { code } => cb.on_error(id, *code),
            EventKind::Started
            | EventKind::Intermediate { .. }
            | EventKind::AsrFinished { .. }
            | EventKind::VoiceChunk { .. } => return Translation::Unsupported,
        }
        Translation::Invoked
    }
}

impl TextInput for Nlp {}
