//! Deterministic in-process engine for tests and demos.
//!
//! No backend, no audio processing. It allocates ids, counts the voice bytes
//! it is fed and answers with canned results so the whole session/dispatch
//! path can be exercised end-to-end:
//!
//! - `start_voice` → `started`; each `put_voice` → `intermediate`
//!   ("heard N bytes"); `end_voice` → (`asrFinished` in speech mode) +
//!   `completed`, or `error(TIMEOUT)` when no voice arrived.
//! - `put_text` → `started`, synthesized `voiceChunk`s (the UTF-8 bytes of
//!   the text), `completed`. In nlp mode only `completed`, carrying an
//!   `echo` intent for the text.
//! - `cancel` / `release` → `cancelled` for each affected open session.
//!
//! Setting `loopback.fail_prepare` to `true` makes `prepare` fail.

use std::collections::BTreeMap;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use super::{Delivery, Engine};
use crate::error::ErrorCode;
use crate::ipc::channel::EventSink;
use crate::ipc::events::{Completion, EngineEvent};

pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Bytes per synthesized voice chunk.
const VOICE_CHUNK_BYTES: usize = 16;

pub const FAIL_PREPARE_KEY: &str = "loopback.fail_prepare";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    Asr,
    Tts,
    Speech,
    Nlp,
}

impl LoopbackMode {
    fn accepts_voice(self) -> bool {
        matches!(self, LoopbackMode::Asr | LoopbackMode::Speech)
    }

    fn accepts_text(self) -> bool {
        matches!(
            self,
            LoopbackMode::Tts | LoopbackMode::Speech | LoopbackMode::Nlp
        )
    }
}

pub struct LoopbackEngine {
    mode: LoopbackMode,
    max_sessions: usize,
    state: Mutex<State>,
    outlet: Outlet,
}

#[derive(Default)]
struct State {
    prepared: bool,
    next_id: i32,
    /// Open voice sessions → bytes received so far.
    open: BTreeMap<i32, usize>,
    options: BTreeMap<String, String>,
}

enum Outlet {
    Push(EventSink),
    /// `tx` is present only while prepared; dropping it ends `poll` once the
    /// receiver is drained.
    Poll {
        tx: Mutex<Option<Sender<EngineEvent>>>,
        rx: Mutex<Receiver<EngineEvent>>,
    },
}

impl LoopbackEngine {
    /// Push-delivery engine writing into `sink`.
    pub fn new(mode: LoopbackMode, sink: EventSink) -> Self {
        Self::with_outlet(mode, Outlet::Push(sink))
    }

    /// Poll-delivery engine; events wait in an internal queue until polled.
    pub fn polled(mode: LoopbackMode) -> Self {
        let (_, rx) = unbounded();
        Self::with_outlet(
            mode,
            Outlet::Poll {
                tx: Mutex::new(None),
                rx: Mutex::new(rx),
            },
        )
    }

    fn with_outlet(mode: LoopbackMode, outlet: Outlet) -> Self {
        Self {
            mode,
            max_sessions: DEFAULT_MAX_SESSIONS,
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            outlet,
        }
    }

    /// Cap on concurrently open voice sessions. Further `start_voice` calls
    /// are refused with `-1`.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn mode(&self) -> LoopbackMode {
        self.mode
    }

    pub fn option(&self, key: &str) -> Option<String> {
        self.state.lock().options.get(key).cloned()
    }

    pub fn open_sessions(&self) -> Vec<i32> {
        self.state.lock().open.keys().copied().collect()
    }

    fn emit(&self, event: EngineEvent) {
        match &self.outlet {
            Outlet::Push(sink) => {
                if !sink.deliver(event) {
                    debug!("loopback event dropped: dispatcher gone");
                }
            }
            Outlet::Poll { tx, .. } => {
                if let Some(tx) = tx.lock().as_ref() {
                    let _ = tx.send(event);
                }
            }
        }
    }

    fn open_poll_stream(&self) {
        if let Outlet::Poll { tx, rx } = &self.outlet {
            let mut tx = tx.lock();
            if tx.is_none() {
                let (new_tx, new_rx) = unbounded();
                *rx.lock() = new_rx;
                *tx = Some(new_tx);
            }
        }
    }

    fn close_poll_stream(&self) {
        if let Outlet::Poll { tx, .. } = &self.outlet {
            tx.lock().take();
        }
    }

    /// Next positive id not held by an open session. Wraps to 1 on overflow.
    fn allocate(&self, state: &mut State) -> i32 {
        loop {
            let id = state.next_id;
            state.next_id = state.next_id.checked_add(1).unwrap_or(1);
            if !state.open.contains_key(&id) {
                return id;
            }
        }
    }

    fn transcript(bytes: usize) -> String {
        format!("heard {bytes} bytes")
    }

    fn completion(&self, asr: String) -> Completion {
        match self.mode {
            LoopbackMode::Speech | LoopbackMode::Nlp => Completion {
                nlp: json!({ "intent": "echo", "query": asr }).to_string(),
                action: "echo".to_string(),
                asr,
            },
            _ => Completion {
                asr,
                ..Completion::default()
            },
        }
    }
}

impl Engine for LoopbackEngine {
    fn delivery(&self) -> Delivery {
        match self.outlet {
            Outlet::Push(_) => Delivery::Push,
            Outlet::Poll { .. } => Delivery::Poll,
        }
    }

    fn prepare(&self) -> bool {
        let mut state = self.state.lock();
        let fail = state
            .options
            .get(FAIL_PREPARE_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
        if fail {
            debug!("loopback prepare refused by configuration");
            return false;
        }
        state.prepared = true;
        self.open_poll_stream();
        true
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.prepared = false;
        for id in std::mem::take(&mut state.open).into_keys() {
            self.emit(EngineEvent::cancelled(id));
        }
        self.close_poll_stream();
    }

    fn configure(&self, key: &str, value: &str) {
        debug!(key, value, "loopback configure");
        self.state
            .lock()
            .options
            .insert(key.to_string(), value.to_string());
    }

    fn start_voice(&self) -> i32 {
        let mut state = self.state.lock();
        if !self.mode.accepts_voice() || !state.prepared || state.open.len() >= self.max_sessions {
            return -1;
        }
        let id = self.allocate(&mut state);
        state.open.insert(id, 0);
        self.emit(EngineEvent::started(id));
        id
    }

    fn put_voice(&self, id: i32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let Some(bytes) = state.open.get_mut(&id) else {
            return;
        };
        *bytes += data.len();
        let text = Self::transcript(*bytes);
        self.emit(EngineEvent::intermediate(id, text));
    }

    fn end_voice(&self, id: i32) {
        let mut state = self.state.lock();
        let Some(bytes) = state.open.remove(&id) else {
            return;
        };
        if bytes == 0 {
            self.emit(EngineEvent::error(id, ErrorCode::Timeout));
            return;
        }
        let text = Self::transcript(bytes);
        if self.mode == LoopbackMode::Speech {
            self.emit(EngineEvent::asr_finished(id, text.clone()));
        }
        let result = self.completion(text);
        self.emit(EngineEvent::completed(id, result));
    }

    fn put_text(&self, text: &str) -> i32 {
        let mut state = self.state.lock();
        if !self.mode.accepts_text() || !state.prepared {
            return -1;
        }
        if text.trim().is_empty() {
            return 0;
        }
        let id = self.allocate(&mut state);
        if self.mode == LoopbackMode::Nlp {
            self.emit(EngineEvent::completed(id, self.completion(text.to_string())));
            return id;
        }
        self.emit(EngineEvent::started(id));
        if self.mode == LoopbackMode::Speech {
            self.emit(EngineEvent::asr_finished(id, text));
        }
        for chunk in text.as_bytes().chunks(VOICE_CHUNK_BYTES) {
            self.emit(EngineEvent::voice_chunk(id, chunk));
        }
        let result = match self.mode {
            LoopbackMode::Speech => self.completion(text.to_string()),
            _ => Completion::default(),
        };
        self.emit(EngineEvent::completed(id, result));
        id
    }

    fn cancel(&self, id: i32) {
        let mut state = self.state.lock();
        if id <= 0 {
            for open in std::mem::take(&mut state.open).into_keys() {
                self.emit(EngineEvent::cancelled(open));
            }
        } else if state.open.remove(&id).is_some() {
            self.emit(EngineEvent::cancelled(id));
        }
    }

    fn poll(&self) -> Option<EngineEvent> {
        let Outlet::Poll { rx, .. } = &self.outlet else {
            return None;
        };
        rx.lock().recv().ok()
    }
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("mode", &self.mode)
            .field("delivery", &self.delivery())
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}
