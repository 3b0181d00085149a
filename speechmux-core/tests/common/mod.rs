#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use speechmux_core::{
    AsrCallback, Client, Completion, Engine, EngineEvent, ErrorCode, EventSink, NlpCallback,
    RequestKind, SessionId, SpeechCallback, TtsCallback,
};

pub const TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

/// Shared state of a [`ScriptedEngine`]; tests keep an `Arc` to drive it.
pub struct Script {
    sink: Mutex<Option<EventSink>>,
    /// Ids returned by the next issuing calls, before falling back to the counter.
    ids: Mutex<VecDeque<i32>>,
    counter: AtomicI32,
    pub prepare_ok: AtomicBool,
    /// Deliver `started` from inside `start_voice`/`put_text`.
    pub started_on_issue: AtomicBool,
    open: Mutex<BTreeSet<i32>>,
    calls: Mutex<Vec<String>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            ids: Mutex::new(VecDeque::new()),
            counter: AtomicI32::new(0),
            prepare_ok: AtomicBool::new(true),
            started_on_issue: AtomicBool::new(false),
            open: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn queue_ids(&self, ids: &[i32]) {
        self.ids.lock().extend(ids.iter().copied());
    }

    /// Push an event as if the engine produced it.
    pub fn emit(&self, event: EngineEvent) {
        let sink = self.sink.lock().clone();
        let sink = sink.expect("engine was not created");
        assert!(sink.deliver(event), "dispatcher is gone");
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn issue(&self) -> i32 {
        let id = self
            .ids
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        if id > 0 {
            self.open.lock().insert(id);
            if self.started_on_issue.load(Ordering::SeqCst) {
                self.emit(EngineEvent::started(id));
            }
        }
        id
    }
}

pub struct ScriptedEngine(pub Arc<Script>);

impl Engine for ScriptedEngine {
    fn prepare(&self) -> bool {
        self.0.log("prepare".into());
        self.0.prepare_ok.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.0.log("release".into());
        let open = std::mem::take(&mut *self.0.open.lock());
        for id in open {
            self.0.emit(EngineEvent::cancelled(id));
        }
    }

    fn configure(&self, key: &str, value: &str) {
        self.0.log(format!("configure {key}={value}"));
    }

    fn start_voice(&self) -> i32 {
        self.0.log("start_voice".into());
        self.0.issue()
    }

    fn put_voice(&self, id: i32, data: &[u8]) {
        self.0.log(format!("put_voice {id} {}", data.len()));
    }

    fn end_voice(&self, id: i32) {
        self.0.log(format!("end_voice {id}"));
    }

    fn put_text(&self, text: &str) -> i32 {
        self.0.log(format!("put_text {text}"));
        self.0.issue()
    }

    fn cancel(&self, id: i32) {
        self.0.log(format!("cancel {id}"));
        let cancelled: Vec<i32> = {
            let mut open = self.0.open.lock();
            if id <= 0 {
                std::mem::take(&mut *open).into_iter().collect()
            } else if open.remove(&id) {
                vec![id]
            } else {
                Vec::new()
            }
        };
        for id in cancelled {
            self.0.emit(EngineEvent::cancelled(id));
        }
    }
}

/// Client over a fresh scripted engine (not prepared).
pub fn scripted_client<K: RequestKind>() -> (Client<K>, Arc<Script>) {
    let script = Script::new();
    let shared = Arc::clone(&script);
    let client = Client::<K>::new(move |sink| {
        *shared.sink.lock() = Some(sink);
        Ok(ScriptedEngine(shared))
    })
    .expect("create client");
    (client, script)
}

/// Prepared client over a fresh scripted engine.
pub fn prepared_client<K: RequestKind>() -> (Client<K>, Arc<Script>) {
    let (client, script) = scripted_client::<K>();
    assert!(client.prepare(), "scripted prepare");
    (client, script)
}

// ---------------------------------------------------------------------------
// Recording callbacks
// ---------------------------------------------------------------------------

/// Forwards every callback as a short string, e.g. `"complete 7 hello"`.
#[derive(Clone)]
pub struct Recorder {
    tx: Sender<String>,
}

pub fn recorder() -> (Recorder, Receiver<String>) {
    let (tx, rx) = unbounded();
    (Recorder { tx }, rx)
}

impl Recorder {
    fn send(&self, call: String) {
        let _ = self.tx.send(call);
    }
}

impl AsrCallback for Recorder {
    fn on_start(&self, id: SessionId) {
        self.send(format!("start {id}"));
    }
    fn on_intermediate_result(&self, id: SessionId, text: &str) {
        self.send(format!("inter {id} {text}"));
    }
    fn on_complete(&self, id: SessionId, text: &str) {
        self.send(format!("complete {id} {text}"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.send(format!("cancel {id}"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.send(format!("error {id} {}", code.code()));
    }
}

impl TtsCallback for Recorder {
    fn on_start(&self, id: SessionId) {
        self.send(format!("start {id}"));
    }
    fn on_voice_chunk(&self, id: SessionId, data: &[u8]) {
        self.send(format!("voice {id} {}", data.len()));
    }
    fn on_complete(&self, id: SessionId) {
        self.send(format!("complete {id}"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.send(format!("cancel {id}"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.send(format!("error {id} {}", code.code()));
    }
}

impl SpeechCallback for Recorder {
    fn on_start(&self, id: SessionId) {
        self.send(format!("start {id}"));
    }
    fn on_intermediate_result(&self, id: SessionId, asr: &str, extra: &str) {
        self.send(format!("inter {id} {asr}|{extra}"));
    }
    fn on_asr_complete(&self, id: SessionId, asr: &str) {
        self.send(format!("asr {id} {asr}"));
    }
    fn on_voice_chunk(&self, id: SessionId, data: &[u8]) {
        self.send(format!("voice {id} {}", data.len()));
    }
    fn on_complete(&self, id: SessionId, result: &Completion) {
        self.send(format!("complete {id} {}|{}|{}", result.asr, result.nlp, result.action));
    }
    fn on_cancel(&self, id: SessionId) {
        self.send(format!("cancel {id}"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.send(format!("error {id} {}", code.code()));
    }
}

impl NlpCallback for Recorder {
    fn on_nlp(&self, id: SessionId, nlp: &str) {
        self.send(format!("nlp {id} {nlp}"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.send(format!("cancel {id}"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.send(format!("error {id} {}", code.code()));
    }
}

/// Panics in `on_complete`.
pub struct Explodes;

impl SpeechCallback for Explodes {
    fn on_complete(&self, _id: SessionId, _result: &Completion) {
        panic!("callback exploded");
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

pub fn recv_with_timeout(rx: &Receiver<String>) -> String {
    rx.recv_timeout(TIMEOUT)
        .unwrap_or_else(|e| panic!("timed out waiting for a callback: {e}"))
}

pub fn recv_n(rx: &Receiver<String>, n: usize) -> Vec<String> {
    (0..n).map(|_| recv_with_timeout(rx)).collect()
}

/// Assert nothing else arrives within a short grace period.
pub fn assert_quiet(rx: &Receiver<String>) {
    if let Ok(call) = rx.recv_timeout(Duration::from_millis(50)) {
        panic!("unexpected callback: {call}");
    }
}

pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() >= TIMEOUT {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn sid(raw: i32) -> SessionId {
    SessionId::from_raw(raw).expect("positive test id")
}
