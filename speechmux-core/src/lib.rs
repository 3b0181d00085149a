//! # speechmux-core
//!
//! Session multiplexing and callback dispatch over one shared speech engine
//! (recognition, synthesis, combined recognition → intent → synthesis, or
//! intent resolution alone).
//!
//! ## Architecture
//!
//! ```text
//! caller threads ──start_voice / put_text──► Client<K> ──(registry lock)──► Engine
//!                                               │                            │
//!                                     SessionRegistry<K::Callback>     EngineEvent
//!                                               ▲                            │
//!                                               │            push: EventSink → EventQueue
//!                                               │            poll: Engine::poll
//!                                               │                            │
//!                                        Dispatcher<K> ◄──── dispatch thread ┘
//!                                               │
//!                                      K::Callback (lock not held)
//! ```
//!
//! Every terminal event (completed, cancelled, error) removes its session's
//! registry entry, so each session sees at most one terminal callback.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod session;

// Convenience re-exports for downstream crates
pub use client::{AsrClient, Client, NlpClient, SpeechClient, TtsClient};
pub use config::{load_config, ClientConfig, DispatchConfig, PrepareOptions, SpeechOptions, TtsOptions};
pub use dispatch::{DiagnosticsSnapshot, DispatchOutcome};
pub use engine::{Delivery, Engine, EngineHandle, LoopbackEngine, LoopbackMode};
pub use error::{ErrorCode, Result, SpeechMuxError};
pub use ipc::channel::EventSink;
pub use ipc::events::{Completion, EngineEvent, EventKind, HandleStatus, HandleStatusEvent};
pub use session::kind::{
    Asr, AsrCallback, Nlp, NlpCallback, RequestKind, Speech, SpeechCallback, Tts, TtsCallback,
};
pub use session::SessionId;
