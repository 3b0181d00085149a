//! Dispatch counters and their serializable snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Counters shared by the controller (caller side) and the dispatcher.
#[derive(Debug)]
pub struct DispatchDiagnostics {
    pub events_received: AtomicUsize,
    pub events_dispatched: AtomicUsize,
    pub stale_events: AtomicUsize,
    pub suppressed_events: AtomicUsize,
    pub unsupported_events: AtomicUsize,
    pub invalid_events: AtomicUsize,
    pub callback_faults: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub allocation_failures: AtomicUsize,
    pub rejected_unprepared: AtomicUsize,
}

impl Default for DispatchDiagnostics {
    fn default() -> Self {
        Self {
            events_received: AtomicUsize::new(0),
            events_dispatched: AtomicUsize::new(0),
            stale_events: AtomicUsize::new(0),
            suppressed_events: AtomicUsize::new(0),
            unsupported_events: AtomicUsize::new(0),
            invalid_events: AtomicUsize::new(0),
            callback_faults: AtomicUsize::new(0),
            sessions_opened: AtomicUsize::new(0),
            sessions_closed: AtomicUsize::new(0),
            allocation_failures: AtomicUsize::new(0),
            rejected_unprepared: AtomicUsize::new(0),
        }
    }
}

impl DispatchDiagnostics {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.events_dispatched.store(0, Ordering::Relaxed);
        self.stale_events.store(0, Ordering::Relaxed);
        self.suppressed_events.store(0, Ordering::Relaxed);
        self.unsupported_events.store(0, Ordering::Relaxed);
        self.invalid_events.store(0, Ordering::Relaxed);
        self.callback_faults.store(0, Ordering::Relaxed);
        self.sessions_opened.store(0, Ordering::Relaxed);
        self.sessions_closed.store(0, Ordering::Relaxed);
        self.allocation_failures.store(0, Ordering::Relaxed);
        self.rejected_unprepared.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
            suppressed_events: self.suppressed_events.load(Ordering::Relaxed),
            unsupported_events: self.unsupported_events.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            callback_faults: self.callback_faults.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            rejected_unprepared: self.rejected_unprepared.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub events_received: usize,
    pub events_dispatched: usize,
    pub stale_events: usize,
    pub suppressed_events: usize,
    /// Events whose kind the request kind has no callback for.
    pub unsupported_events: usize,
    /// Events carrying a non-positive session id.
    pub invalid_events: usize,
    pub callback_faults: usize,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub allocation_failures: usize,
    pub rejected_unprepared: usize,
}

impl DiagnosticsSnapshot {
    /// Sessions registered and not yet torn down.
    pub fn sessions_open(&self) -> usize {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}
