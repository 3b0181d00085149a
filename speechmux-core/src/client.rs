//! Per-kind session controller over one engine handle.
//!
//! ## Threading
//!
//! Request operations may be called from any number of threads. Exactly one
//! dispatch thread delivers callbacks:
//!
//! - push engines: spawned at construction, drains the event queue the
//!   engine writes into, stopped when the client is dropped;
//! - poll engines: spawned by a successful `prepare()`, blocks in
//!   `Engine::poll`, joined by `release()`.
//!
//! Issuing a session id and registering its callback happen under the
//! registry lock, so the dispatcher never sees an event for an id before its
//! callback is in place.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, DispatchConfig};
use crate::dispatch::{DiagnosticsSnapshot, DispatchDiagnostics, DispatchThread, Dispatcher};
use crate::engine::{Delivery, Engine, EngineHandle};
use crate::error::{Result, SpeechMuxError};
use crate::ipc::channel::{event_channel, EventSink};
use crate::ipc::events::{HandleStatus, HandleStatusEvent};
use crate::session::kind::{Asr, Nlp, RequestKind, Speech, TextInput, Tts, VoiceInput};
use crate::session::registry::SessionRegistry;
use crate::session::SessionId;

pub type AsrClient = Client<Asr>;
pub type TtsClient = Client<Tts>;
pub type SpeechClient = Client<Speech>;
pub type NlpClient = Client<Nlp>;

pub struct Client<K: RequestKind> {
    handle: EngineHandle,
    registry: Arc<SessionRegistry<K::Callback>>,
    diagnostics: Arc<DispatchDiagnostics>,
    dispatch: DispatchConfig,
    push_thread: Option<DispatchThread>,
    poll_thread: Mutex<Option<DispatchThread>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: RequestKind> Client<K> {
    /// Create the engine with `factory` and start dispatching. The engine is
    /// not prepared yet.
    pub fn new<E, F>(factory: F) -> Result<Self>
    where
        E: Engine,
        F: FnOnce(EventSink) -> anyhow::Result<E>,
    {
        Self::with_dispatch_config(factory, DispatchConfig::default())
    }

    pub fn with_dispatch_config<E, F>(factory: F, dispatch: DispatchConfig) -> Result<Self>
    where
        E: Engine,
        F: FnOnce(EventSink) -> anyhow::Result<E>,
    {
        let (sink, queue, closer) = event_channel();
        let handle = EngineHandle::create(factory, sink)?;
        let registry = Arc::new(SessionRegistry::new());
        let diagnostics = Arc::new(DispatchDiagnostics::default());

        let push_thread = match handle.delivery() {
            Delivery::Push => Some(DispatchThread::spawn(
                Dispatcher::<K>::new(Arc::clone(&registry), Arc::clone(&diagnostics)),
                queue,
                Some(closer),
                &dispatch.thread_name,
            )?),
            Delivery::Poll => None,
        };

        info!(kind = K::NAME, delivery = ?handle.delivery(), "client created");
        Ok(Self {
            handle,
            registry,
            diagnostics,
            dispatch,
            push_thread,
            poll_thread: Mutex::new(None),
            _kind: PhantomData,
        })
    }

    /// Create, apply `config` and prepare.
    ///
    /// A failed prepare is not an error here: the client is returned in the
    /// `Unavailable` state and request operations fail fast.
    pub fn open<E, F>(factory: F, config: &ClientConfig) -> Result<Self>
    where
        E: Engine,
        F: FnOnce(EventSink) -> anyhow::Result<E>,
    {
        let client = Self::with_dispatch_config(factory, config.dispatch.clone())?;
        client.apply_config(config);
        if !client.prepare() {
            warn!(kind = K::NAME, "client opened with an unprepared engine");
        }
        Ok(client)
    }

    pub fn configure(&self, key: &str, value: &str) {
        self.handle.configure(key, value);
    }

    /// Apply every `(key, value)` pair of `config` in order.
    pub fn apply_config(&self, config: &ClientConfig) {
        for (key, value) in config.config_pairs() {
            self.handle.configure(&key, &value);
        }
    }

    /// Prepare the engine. `false` if the engine refused; requests then fail
    /// with `EngineUnavailable` until a later prepare succeeds.
    pub fn prepare(&self) -> bool {
        if !self.handle.prepare() {
            return false;
        }
        if self.handle.delivery() != Delivery::Poll {
            return true;
        }

        let mut slot = self.poll_thread.lock();
        if slot.is_some() {
            return true;
        }
        match DispatchThread::spawn(
            self.dispatcher(),
            self.handle.poll_source(),
            None,
            &self.dispatch.thread_name,
        ) {
            Ok(thread) => {
                *slot = Some(thread);
                true
            }
            Err(e) => {
                error!(kind = K::NAME, error = %e, "failed to spawn poll dispatch thread");
                drop(slot);
                self.handle.release();
                false
            }
        }
    }

    /// Release the engine. Open sessions receive their terminal events from
    /// the engine. Idempotent.
    pub fn release(&self) {
        if !self.handle.release() {
            return;
        }
        let thread = self.poll_thread.lock().take();
        if let Some(mut thread) = thread {
            if !thread.shutdown() {
                // Released from a callback: the poll loop is still running and
                // delivers the engine's cancellations before the stream ends.
                debug!(kind = K::NAME, "release from the dispatch thread, poll loop left to drain");
                return;
            }
            // The poll loop has ended; nothing can close these any more.
            let leftover = self.registry.drain();
            if !leftover.is_empty() {
                warn!(
                    kind = K::NAME,
                    count = leftover.len(),
                    "sessions without a terminal event dropped on release"
                );
                self.diagnostics
                    .sessions_closed
                    .fetch_add(leftover.len(), std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    /// Release and destroy. Equivalent to dropping the client.
    pub fn destroy(self) {}

    pub fn is_prepared(&self) -> bool {
        self.handle.is_prepared()
    }

    pub fn delivery(&self) -> Delivery {
        self.handle.delivery()
    }

    pub fn status(&self) -> HandleStatus {
        self.handle.status()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<HandleStatusEvent> {
        self.handle.subscribe_status()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Ids of sessions that have not reached a terminal event.
    pub fn open_sessions(&self) -> Vec<SessionId> {
        self.registry.ids()
    }

    pub fn is_open(&self, id: SessionId) -> bool {
        self.registry.contains(id)
    }

    /// Ask the engine to cancel `id`. The `on_cancel` callback follows
    /// asynchronously. No effect on sessions that are not open.
    pub fn cancel(&self, id: SessionId) {
        if !self.is_active(id) {
            debug!(kind = K::NAME, session_id = %id, "cancel ignored: session not open");
            return;
        }
        self.handle.engine().cancel(id.as_raw());
    }

    /// Ask the engine to cancel every open session.
    pub fn cancel_all(&self) {
        if !self.handle.is_prepared() {
            return;
        }
        self.handle.engine().cancel(0);
    }

    fn is_active(&self, id: SessionId) -> bool {
        self.handle.is_prepared() && self.registry.contains(id)
    }

    fn dispatcher(&self) -> Dispatcher<K> {
        Dispatcher::new(Arc::clone(&self.registry), Arc::clone(&self.diagnostics))
    }

    fn issue<F>(&self, op: &'static str, callback: Arc<K::Callback>, issue: F) -> Result<SessionId>
    where
        F: FnOnce(&dyn Engine) -> i32,
    {
        if let Err(e) = self.handle.ensure_prepared() {
            DispatchDiagnostics::bump(&self.diagnostics.rejected_unprepared);
            debug!(kind = K::NAME, op, error = %e, "request rejected");
            return Err(e);
        }

        let engine = self.handle.engine();
        match self.registry.issue_with(|| issue(engine), callback) {
            Ok(id) => {
                DispatchDiagnostics::bump(&self.diagnostics.sessions_opened);
                debug!(kind = K::NAME, op, session_id = %id, "session opened");
                Ok(id)
            }
            Err(e) => {
                if let SpeechMuxError::AllocationFailed { code } = e {
                    DispatchDiagnostics::bump(&self.diagnostics.allocation_failures);
                    warn!(kind = K::NAME, op, code, "engine refused to open a session");
                }
                Err(e)
            }
        }
    }
}

impl<K: VoiceInput> Client<K> {
    /// Open a voice session. `callback` receives every event for it.
    pub fn start_voice(&self, callback: Arc<K::Callback>) -> Result<SessionId> {
        self.issue("start_voice", callback, |engine| engine.start_voice())
    }

    /// Forward a chunk of encoded voice. Ignored for empty chunks and for
    /// sessions that are not open.
    pub fn put_voice(&self, id: SessionId, data: &[u8]) {
        if data.is_empty() || !self.is_active(id) {
            return;
        }
        self.handle.engine().put_voice(id.as_raw(), data);
    }

    /// Forward `data[offset..offset + length]`. Zero-length and
    /// out-of-bounds regions are ignored.
    pub fn put_voice_region(&self, id: SessionId, data: &[u8], offset: usize, length: usize) {
        let region = offset
            .checked_add(length)
            .and_then(|end| data.get(offset..end));
        match region {
            Some(region) => self.put_voice(id, region),
            None => debug!(
                kind = K::NAME,
                session_id = %id,
                offset,
                length,
                available = data.len(),
                "voice region out of bounds, ignored"
            ),
        }
    }

    /// Signal end of voice input. The session stays open until the engine
    /// reports a terminal event.
    pub fn end_voice(&self, id: SessionId) {
        if !self.is_active(id) {
            return;
        }
        self.handle.engine().end_voice(id.as_raw());
    }
}

impl<K: TextInput> Client<K> {
    /// Submit `text` as a new session.
    pub fn put_text(&self, text: &str, callback: Arc<K::Callback>) -> Result<SessionId> {
        self.issue("put_text", callback, |engine| engine.put_text(text))
    }
}

impl<K: RequestKind> Drop for Client<K> {
    fn drop(&mut self) {
        self.release();
        if let Some(mut thread) = self.push_thread.take() {
            thread.shutdown();
        }
        info!(kind = K::NAME, "client destroyed");
    }
}

impl<K: RequestKind> std::fmt::Debug for Client<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("kind", &K::NAME)
            .field("handle", &self.handle)
            .field("open", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::loopback::{LoopbackEngine, LoopbackMode, FAIL_PREPARE_KEY};
    use crate::session::kind::{AsrCallback, TtsCallback};

    struct Quiet;
    impl AsrCallback for Quiet {}
    impl TtsCallback for Quiet {}

    #[test]
    fn requests_fail_fast_before_prepare() {
        let client: AsrClient =
            Client::new(|sink| Ok(LoopbackEngine::new(LoopbackMode::Asr, sink))).expect("client");
        let err = client
            .start_voice(Arc::new(Quiet))
            .expect_err("unprepared engine");
        assert!(matches!(err, SpeechMuxError::NotPrepared));
        assert!(client.open_sessions().is_empty());
        assert_eq!(client.diagnostics_snapshot().rejected_unprepared, 1);
    }

    #[test]
    fn open_with_failing_prepare_reports_unavailable() {
        let mut config = ClientConfig::default();
        config.prepare.host = "localhost".into();
        let client: TtsClient = Client::open(
            |sink| {
                let engine = LoopbackEngine::new(LoopbackMode::Tts, sink);
                engine.configure(FAIL_PREPARE_KEY, "1");
                Ok(engine)
            },
            &config,
        )
        .expect("client");

        assert_eq!(client.status(), HandleStatus::Unavailable);
        let err = client
            .put_text("hello", Arc::new(Quiet))
            .expect_err("unavailable engine");
        assert!(matches!(err, SpeechMuxError::EngineUnavailable(_)));
    }

    #[test]
    fn region_outside_the_buffer_is_ignored() {
        let client: AsrClient =
            Client::new(|sink| Ok(LoopbackEngine::new(LoopbackMode::Asr, sink))).expect("client");
        assert!(client.prepare());
        let id = client.start_voice(Arc::new(Quiet)).expect("session");

        let data = [0_u8; 8];
        client.put_voice_region(id, &data, 4, 8);
        client.put_voice_region(id, &data, usize::MAX, 2);
        client.put_voice_region(id, &data, 2, 0);
        assert!(client.is_open(id));
        client.destroy();
    }

    #[test]
    fn factory_failure_surfaces_as_engine_unavailable() {
        let err = SpeechClient::new(|_sink| -> anyhow::Result<LoopbackEngine> {
            anyhow::bail!("native library missing")
        })
        .expect_err("factory failure");
        assert!(matches!(err, SpeechMuxError::EngineUnavailable(_)));
    }
}
