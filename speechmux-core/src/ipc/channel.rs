//! Engine → dispatcher event channel.
//!
//! Push-model engines receive an [`EventSink`] at creation time and call
//! [`EventSink::deliver`] from whatever thread produced the event. The single
//! dispatch thread owns the [`EventQueue`]. The queue is unbounded: an engine
//! may deliver from inside `start_voice`/`put_text` while the caller still
//! holds the registry lock, so `deliver` must never wait on the consumer.
//!
//! Shutdown is signalled out of band through [`QueueCloser`] so that stray
//! sink clones held by engine threads cannot keep the dispatch thread alive.
//! After close, events already queued are still drained.

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::trace;

use super::events::EngineEvent;

/// Create a connected sink/queue pair plus the closer for the queue.
pub fn event_channel() -> (EventSink, EventQueue, QueueCloser) {
    let (tx, rx) = unbounded();
    let (close_tx, close_rx) = unbounded();
    (
        EventSink { tx },
        EventQueue {
            events: rx,
            closed: close_rx,
        },
        QueueCloser { _tx: close_tx },
    )
}

/// Producer half handed to push-model engines. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
}

impl EventSink {
    /// Deliver one event. Returns `false` once the queue is gone.
    pub fn deliver(&self, event: EngineEvent) -> bool {
        trace!(session_id = event.id, event = event.kind.name(), "event delivered");
        self.tx.send(event).is_ok()
    }
}

/// Consumer half, drained by the dispatch thread.
#[derive(Debug)]
pub struct EventQueue {
    events: Receiver<EngineEvent>,
    closed: Receiver<()>,
}

impl EventQueue {
    /// Block until an event arrives or the queue is closed and empty.
    pub fn recv(&self) -> Option<EngineEvent> {
        select! {
            recv(self.events) -> event => event.ok(),
            recv(self.closed) -> _ => self.events.try_recv().ok(),
        }
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Dropping (or closing) this ends the queue once it has been drained.
#[derive(Debug)]
pub struct QueueCloser {
    _tx: Sender<()>,
}

impl QueueCloser {
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_yields_events_in_delivery_order() {
        let (sink, queue, _closer) = event_channel();
        assert!(sink.deliver(EngineEvent::started(1)));
        assert!(sink.deliver(EngineEvent::cancelled(1)));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.recv(), Some(EngineEvent::started(1)));
        assert_eq!(queue.recv(), Some(EngineEvent::cancelled(1)));
        assert!(queue.is_empty());
    }

    #[test]
    fn closed_queue_drains_pending_events_then_ends() {
        let (sink, queue, closer) = event_channel();
        sink.deliver(EngineEvent::started(4));
        sink.deliver(EngineEvent::cancelled(4));
        closer.close();

        let mut drained = Vec::new();
        while let Some(event) = queue.recv() {
            drained.push(event);
        }
        assert_eq!(
            drained,
            vec![EngineEvent::started(4), EngineEvent::cancelled(4)]
        );
        // The sink is still alive; the closer alone ended the queue.
        assert!(sink.deliver(EngineEvent::started(5)));
    }

    #[test]
    fn queue_ends_when_every_sink_is_dropped() {
        let (sink, queue, _closer) = event_channel();
        let clone = sink.clone();
        drop(sink);
        clone.deliver(EngineEvent::started(2));
        drop(clone);

        assert_eq!(queue.recv(), Some(EngineEvent::started(2)));
        assert_eq!(queue.recv(), None);
    }

    #[test]
    fn deliver_reports_a_dropped_queue() {
        let (sink, queue, _closer) = event_channel();
        drop(queue);
        assert!(!sink.deliver(EngineEvent::started(1)));
    }
}
