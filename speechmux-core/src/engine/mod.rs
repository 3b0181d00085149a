//! Engine abstraction and the owning [`EngineHandle`].
//!
//! ## Lifecycle
//!
//! ```text
//! EngineHandle::create()    status = Created
//!     ├─► configure(k, v)*  (any time before destroy)
//!     └─► prepare()         status = Prepared | Unavailable
//!         └─► release()     status = Released (idempotent)
//!             └─► destroy() status = Destroyed (terminal, consumes the handle)
//! ```
//!
//! `configure`, `prepare` and `release` are not serialized against each other;
//! the owner is expected to drive setup from one thread.

pub mod loopback;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dispatch::EventSource;
use crate::error::{Result, SpeechMuxError};
use crate::ipc::channel::EventSink;
use crate::ipc::events::{EngineEvent, HandleStatus, HandleStatusEvent};

pub use loopback::{LoopbackEngine, LoopbackMode};

/// Broadcast channel capacity for handle status events.
const STATUS_CAP: usize = 64;

/// How an engine hands events to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// The engine calls [`EventSink::deliver`] from its own threads.
    #[default]
    Push,
    /// A dispatch thread blocks in [`Engine::poll`].
    Poll,
}

/// Contract for a speech engine instance.
///
/// Methods take `&self`: any locking the engine needs is its own business.
/// Raw ids follow the engine convention: positive is a session, zero or
/// negative is a refusal.
pub trait Engine: Send + Sync + 'static {
    fn delivery(&self) -> Delivery {
        Delivery::Push
    }

    /// Bring the engine up. `false` on failure; must not panic.
    fn prepare(&self) -> bool;

    /// Cancel every open session (each gets a terminal event) and go back to
    /// the unprepared state.
    fn release(&self);

    /// Set one string option. Unknown keys are the engine's concern.
    fn configure(&self, key: &str, value: &str);

    fn start_voice(&self) -> i32;

    fn put_voice(&self, id: i32, data: &[u8]);

    /// End-of-input signal. The session stays open until a terminal event.
    fn end_voice(&self, id: i32);

    fn put_text(&self, text: &str) -> i32;

    /// Cancel `id`, or every open session when `id <= 0`.
    fn cancel(&self, id: i32);

    /// Block until the next event. `None` once released and drained.
    /// Only called for [`Delivery::Poll`] engines.
    fn poll(&self) -> Option<EngineEvent> {
        None
    }
}

/// Exclusively owned engine instance plus its prepared flag and status.
pub struct EngineHandle {
    engine: Arc<dyn Engine>,
    prepared: AtomicBool,
    status: Mutex<HandleStatus>,
    status_tx: broadcast::Sender<HandleStatusEvent>,
}

impl EngineHandle {
    /// Build the engine with `factory`, handing it the sink it should push
    /// events into. A factory error becomes `EngineUnavailable`.
    pub fn create<E, F>(factory: F, sink: EventSink) -> Result<Self>
    where
        E: Engine,
        F: FnOnce(EventSink) -> anyhow::Result<E>,
    {
        let engine = factory(sink).map_err(|e| {
            warn!(error = %e, "engine creation failed");
            SpeechMuxError::EngineUnavailable(format!("{e:#}"))
        })?;
        let (status_tx, _) = broadcast::channel(STATUS_CAP);
        info!(delivery = ?engine.delivery(), "engine created");
        Ok(Self {
            engine: Arc::new(engine),
            prepared: AtomicBool::new(false),
            status: Mutex::new(HandleStatus::Created),
            status_tx,
        })
    }

    pub fn delivery(&self) -> Delivery {
        self.engine.delivery()
    }

    pub fn configure(&self, key: &str, value: &str) {
        debug!(key, "configure");
        self.engine.configure(key, value);
    }

    /// `false` leaves the handle unprepared and marks it unavailable.
    pub fn prepare(&self) -> bool {
        if self.prepared.load(Ordering::SeqCst) {
            debug!("prepare on an already prepared engine");
            return true;
        }
        if self.engine.prepare() {
            self.prepared.store(true, Ordering::SeqCst);
            self.set_status(HandleStatus::Prepared, None);
            info!("engine prepared");
            true
        } else {
            self.set_status(HandleStatus::Unavailable, Some("prepare failed".into()));
            warn!("engine prepare failed");
            false
        }
    }

    /// Release the engine. Returns `true` if this call did the release.
    pub fn release(&self) -> bool {
        if !self.prepared.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.engine.release();
        self.set_status(HandleStatus::Released, None);
        info!("engine released");
        true
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    /// Fail fast unless requests can be issued.
    pub fn ensure_prepared(&self) -> Result<()> {
        if self.is_prepared() {
            return Ok(());
        }
        match self.status() {
            HandleStatus::Unavailable => Err(SpeechMuxError::EngineUnavailable(
                "engine failed to prepare".into(),
            )),
            _ => Err(SpeechMuxError::NotPrepared),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Event source over [`Engine::poll`] for a dispatch thread.
    pub fn poll_source(&self) -> PollSource {
        PollSource {
            engine: Arc::clone(&self.engine),
        }
    }

    pub fn status(&self) -> HandleStatus {
        *self.status.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<HandleStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Release if needed and destroy. Same as dropping the handle.
    pub fn destroy(self) {}

    fn set_status(&self, status: HandleStatus, detail: Option<String>) {
        *self.status.lock() = status;
        // Ignore send errors: no subscribers is fine.
        let _ = self.status_tx.send(HandleStatusEvent { status, detail });
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
        self.set_status(HandleStatus::Destroyed, None);
        info!("engine destroyed");
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("prepared", &self.is_prepared())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// [`EventSource`] that blocks in the engine's `poll`.
pub struct PollSource {
    engine: Arc<dyn Engine>,
}

impl EventSource for PollSource {
    fn next_event(&mut self) -> Option<EngineEvent> {
        self.engine.poll()
    }
}
