//! Event dispatcher: engine events → registered callbacks.
//!
//! ## Per-event steps
//!
//! ```text
//! EngineEvent ─► id > 0? ──no──► warn, discard
//!                  │
//!            registry.lookup(id) ──miss──► debug, discard (stale)
//!                  │
//!        catch_unwind(K::translate)        (registry lock NOT held)
//!                  │
//!        terminal or panicked? ──yes──► registry.remove(id)
//! ```
//!
//! Exactly one dispatch path runs per client: either a [`DispatchThread`]
//! draining the push-model [`EventQueue`], or one polling the engine.

pub mod diagnostics;

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::ipc::channel::{EventQueue, QueueCloser};
use crate::ipc::events::EngineEvent;
use crate::session::kind::{RequestKind, Translation};
use crate::session::registry::SessionRegistry;
use crate::session::SessionId;

pub use diagnostics::{DiagnosticsSnapshot, DispatchDiagnostics};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Empty intermediate result; nothing invoked.
    Suppressed,
    /// The request kind has no callback for this event kind.
    Unsupported,
    /// No open session for the id.
    Stale,
    /// The callback panicked. The session was torn down.
    Faulted,
    /// Non-positive session id.
    Invalid,
}

/// A blocking stream of engine events. `None` ends the dispatch loop.
pub trait EventSource {
    fn next_event(&mut self) -> Option<EngineEvent>;
}

impl EventSource for EventQueue {
    fn next_event(&mut self) -> Option<EngineEvent> {
        self.recv()
    }
}

pub struct Dispatcher<K: RequestKind> {
    registry: Arc<SessionRegistry<K::Callback>>,
    diagnostics: Arc<DispatchDiagnostics>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: RequestKind> Dispatcher<K> {
    pub fn new(
        registry: Arc<SessionRegistry<K::Callback>>,
        diagnostics: Arc<DispatchDiagnostics>,
    ) -> Self {
        Self {
            registry,
            diagnostics,
            _kind: PhantomData,
        }
    }

    /// Route one event to its session's callback.
    pub fn dispatch(&self, event: EngineEvent) -> DispatchOutcome {
        DispatchDiagnostics::bump(&self.diagnostics.events_received);

        let Some(id) = SessionId::from_raw(event.id) else {
            warn!(kind = K::NAME, session_id = event.id, event = event.kind.name(), "event with invalid session id discarded");
            DispatchDiagnostics::bump(&self.diagnostics.invalid_events);
            return DispatchOutcome::Invalid;
        };

        let Some(callback) = self.registry.lookup(id) else {
            debug!(kind = K::NAME, session_id = %id, event = event.kind.name(), "stale event discarded");
            DispatchDiagnostics::bump(&self.diagnostics.stale_events);
            return DispatchOutcome::Stale;
        };

        let translated =
            panic::catch_unwind(AssertUnwindSafe(|| K::translate(&*callback, id, &event.kind)));
        // Drop our clone before teardown so the registry holds the last reference.
        drop(callback);

        match translated {
            Ok(translation) => {
                if event.kind.is_terminal() {
                    self.close(id);
                }
                match translation {
                    Translation::Invoked => {
                        trace!(kind = K::NAME, session_id = %id, event = event.kind.name(), "dispatched");
                        DispatchDiagnostics::bump(&self.diagnostics.events_dispatched);
                        DispatchOutcome::Delivered
                    }
                    Translation::Suppressed => {
                        DispatchDiagnostics::bump(&self.diagnostics.suppressed_events);
                        DispatchOutcome::Suppressed
                    }
                    Translation::Unsupported => {
                        warn!(kind = K::NAME, session_id = %id, event = event.kind.name(), "event kind not supported by this client");
                        DispatchDiagnostics::bump(&self.diagnostics.unsupported_events);
                        DispatchOutcome::Unsupported
                    }
                }
            }
            Err(payload) => {
                error!(
                    kind = K::NAME,
                    session_id = %id,
                    event = event.kind.name(),
                    panic = %panic_message(payload.as_ref()),
                    "callback panicked, closing session"
                );
                DispatchDiagnostics::bump(&self.diagnostics.callback_faults);
                self.close(id);
                DispatchOutcome::Faulted
            }
        }
    }

    /// Dispatch until `source` ends.
    pub fn run<S: EventSource>(&self, mut source: S) {
        info!(kind = K::NAME, "dispatch loop started");
        while let Some(event) = source.next_event() {
            self.dispatch(event);
        }
        info!(kind = K::NAME, "dispatch loop stopped");
    }

    fn close(&self, id: SessionId) {
        if self.registry.remove(id).is_some() {
            DispatchDiagnostics::bump(&self.diagnostics.sessions_closed);
            debug!(kind = K::NAME, session_id = %id, "session closed");
        }
    }
}

impl<K: RequestKind> Clone for Dispatcher<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            diagnostics: Arc::clone(&self.diagnostics),
            _kind: PhantomData,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Owned dispatch thread. Dropping it stops and joins the thread.
pub struct DispatchThread {
    closer: Option<QueueCloser>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    /// Spawn a named thread running `dispatcher` over `source`.
    ///
    /// With a `closer`, [`shutdown`](Self::shutdown) ends the queue before
    /// joining. Without one, the source must end on its own (a polled engine
    /// returns `None` once released).
    pub fn spawn<K, S>(
        dispatcher: Dispatcher<K>,
        source: S,
        closer: Option<QueueCloser>,
        name: &str,
    ) -> Result<Self>
    where
        K: RequestKind,
        S: EventSource + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || dispatcher.run(source))?;
        Ok(Self {
            closer,
            handle: Some(handle),
        })
    }

    /// Close the queue (if any) and wait for the thread to exit.
    ///
    /// Returns `false` when called from the dispatch thread itself (a callback
    /// tearing its client down): the join is skipped and the loop keeps
    /// dispatching until its source ends.
    pub fn shutdown(&mut self) -> bool {
        if let Some(closer) = self.closer.take() {
            closer.close();
        }
        let Some(handle) = self.handle.take() else {
            return true;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("dispatch thread shutdown requested from within a callback; not joining");
            return false;
        }
        if handle.join().is_err() {
            error!("dispatch thread panicked");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchThread")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::error::ErrorCode;
    use crate::ipc::channel::event_channel;
    use crate::ipc::events::{Completion, EventKind};
    use crate::session::kind::{Asr, AsrCallback, Nlp, NlpCallback, Speech, SpeechCallback};

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl AsrCallback for Log {
        fn on_start(&self, id: SessionId) {
            self.0.lock().push(format!("start {id}"));
        }
        fn on_complete(&self, id: SessionId, text: &str) {
            self.0.lock().push(format!("complete {id} {text}"));
        }
        fn on_error(&self, id: SessionId, code: ErrorCode) {
            self.0.lock().push(format!("error {id} {}", code.code()));
        }
    }

    struct PanicOnComplete;

    impl SpeechCallback for PanicOnComplete {
        fn on_complete(&self, _id: SessionId, _result: &Completion) {
            panic!("callback blew up");
        }
    }

    fn sid(raw: i32) -> SessionId {
        SessionId::from_raw(raw).expect("positive test id")
    }

    fn asr_dispatcher() -> (Dispatcher<Asr>, Arc<SessionRegistry<dyn AsrCallback>>, Arc<DispatchDiagnostics>) {
        let registry: Arc<SessionRegistry<dyn AsrCallback>> = Arc::new(SessionRegistry::new());
        let diagnostics = Arc::new(DispatchDiagnostics::default());
        (
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&diagnostics)),
            registry,
            diagnostics,
        )
    }

    #[test]
    fn terminal_event_removes_entry_and_later_events_are_stale() {
        let (dispatcher, registry, diagnostics) = asr_dispatcher();
        let log = Arc::new(Log::default());
        let cb: Arc<dyn AsrCallback> = log.clone();
        registry.insert(sid(7), cb).expect("insert");

        assert_eq!(dispatcher.dispatch(EngineEvent::started(7)), DispatchOutcome::Delivered);
        assert_eq!(
            dispatcher.dispatch(EngineEvent::intermediate(7, "")),
            DispatchOutcome::Suppressed
        );
        let done = EngineEvent::completed(
            7,
            Completion {
                asr: "hello".into(),
                ..Completion::default()
            },
        );
        assert_eq!(dispatcher.dispatch(done), DispatchOutcome::Delivered);
        assert!(!registry.contains(sid(7)));

        assert_eq!(
            dispatcher.dispatch(EngineEvent::error(7, ErrorCode::ServerBusy)),
            DispatchOutcome::Stale
        );
        for late in [EngineEvent::started(7), EngineEvent::intermediate(7, "again")] {
            assert_eq!(dispatcher.dispatch(late), DispatchOutcome::Stale);
        }
        assert_eq!(log.entries(), vec!["start 7", "complete 7 hello"]);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.events_received, 6);
        assert_eq!(snap.events_dispatched, 2);
        assert_eq!(snap.suppressed_events, 1);
        assert_eq!(snap.stale_events, 3);
        assert_eq!(snap.sessions_closed, 1);
    }

    impl NlpCallback for Log {
        fn on_nlp(&self, id: SessionId, nlp: &str) {
            self.0.lock().push(format!("nlp {id} {nlp}"));
        }
    }

    #[test]
    fn nlp_result_closes_the_request() {
        let registry: Arc<SessionRegistry<dyn NlpCallback>> = Arc::new(SessionRegistry::new());
        let diagnostics = Arc::new(DispatchDiagnostics::default());
        let dispatcher: Dispatcher<Nlp> =
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&diagnostics));
        let log = Arc::new(Log::default());
        let cb: Arc<dyn NlpCallback> = log.clone();
        registry.insert(sid(5), cb).expect("insert");

        assert_eq!(
            dispatcher.dispatch(EngineEvent::started(5)),
            DispatchOutcome::Unsupported
        );
        assert!(registry.contains(sid(5)));
        let result = Completion {
            nlp: "{}".into(),
            ..Completion::default()
        };
        assert_eq!(
            dispatcher.dispatch(EngineEvent::completed(5, result)),
            DispatchOutcome::Delivered
        );
        assert!(registry.is_empty());
        assert_eq!(
            dispatcher.dispatch(EngineEvent::cancelled(5)),
            DispatchOutcome::Stale
        );
        assert_eq!(log.entries(), vec!["nlp 5 {}"]);
    }

    #[test]
    fn non_positive_ids_are_discarded() {
        let (dispatcher, _registry, diagnostics) = asr_dispatcher();
        assert_eq!(dispatcher.dispatch(EngineEvent::started(0)), DispatchOutcome::Invalid);
        assert_eq!(dispatcher.dispatch(EngineEvent::started(-3)), DispatchOutcome::Invalid);
        assert_eq!(diagnostics.snapshot().invalid_events, 2);
    }

    #[test]
    fn unsupported_terminal_free_event_keeps_session_open() {
        let (dispatcher, registry, diagnostics) = asr_dispatcher();
        let cb: Arc<dyn AsrCallback> = Arc::new(Log::default());
        registry.insert(sid(2), cb).expect("insert");

        assert_eq!(
            dispatcher.dispatch(EngineEvent::voice_chunk(2, vec![1, 2, 3])),
            DispatchOutcome::Unsupported
        );
        assert!(registry.contains(sid(2)));
        assert_eq!(diagnostics.snapshot().unsupported_events, 1);
    }

    #[test]
    fn panicking_callback_is_isolated_and_session_removed() {
        let registry: Arc<SessionRegistry<dyn SpeechCallback>> = Arc::new(SessionRegistry::new());
        let diagnostics = Arc::new(DispatchDiagnostics::default());
        let dispatcher: Dispatcher<Speech> =
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&diagnostics));

        let cb: Arc<dyn SpeechCallback> = Arc::new(PanicOnComplete);
        registry.insert(sid(3), cb).expect("insert");

        let outcome = dispatcher.dispatch(EngineEvent::completed(3, Completion::default()));
        assert_eq!(outcome, DispatchOutcome::Faulted);
        assert!(registry.is_empty());
        assert_eq!(diagnostics.snapshot().callback_faults, 1);

        // A fault on a non-terminal event also closes the session.
        struct PanicOnStart;
        impl SpeechCallback for PanicOnStart {
            fn on_start(&self, _id: SessionId) {
                panic!("{}", String::from("start failed"));
            }
        }
        let cb: Arc<dyn SpeechCallback> = Arc::new(PanicOnStart);
        registry.insert(sid(4), cb).expect("insert");
        assert_eq!(dispatcher.dispatch(EngineEvent::started(4)), DispatchOutcome::Faulted);
        assert!(!registry.contains(sid(4)));
        assert_eq!(
            dispatcher.dispatch(EngineEvent::new(4, EventKind::Cancelled)),
            DispatchOutcome::Stale
        );
    }

    #[test]
    fn dispatch_thread_drains_queue_and_stops_on_shutdown() {
        let (dispatcher, registry, diagnostics) = asr_dispatcher();
        let log = Arc::new(Log::default());
        let cb: Arc<dyn AsrCallback> = log.clone();
        registry.insert(sid(1), cb).expect("insert");

        let (sink, queue, closer) = event_channel();
        let mut thread =
            DispatchThread::spawn(dispatcher, queue, Some(closer), "dispatch-test").expect("spawn");

        sink.deliver(EngineEvent::started(1));
        sink.deliver(EngineEvent::cancelled(1));
        assert!(thread.shutdown());

        assert!(!thread.is_running());
        assert!(registry.is_empty());
        assert_eq!(log.entries(), vec!["start 1"]);
        assert_eq!(diagnostics.snapshot().events_received, 2);
        // The sink outlives the thread without blocking anything.
        drop(sink);
    }

    #[test]
    fn panic_message_handles_both_payload_types() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
