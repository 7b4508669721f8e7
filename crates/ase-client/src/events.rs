//! Event notifications surfaced to the owning connection object.
//!
//! An [`EventSink`] is an observer registry keyed by event kind. Callbacks
//! run synchronously on the session's task, in the order the corresponding
//! tokens were parsed. Clones share one registry, so a sink can be handed to
//! a connection factory and still be observed by its creator.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tds5_protocol::ServerMessage;

use crate::state::SessionState;

type InfoCallback = Arc<dyn Fn(&ServerMessage) + Send + Sync>;
type StateCallback = Arc<dyn Fn(SessionState, SessionState) + Send + Sync>;
type TraceCallback = Arc<dyn Fn(TraceEvent<'_>) + Send + Sync>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Kind of event a callback observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Informational server messages.
    Info,
    /// Server error messages, delivered as parsed and also raised at the
    /// end of the response.
    Error,
    /// Session state changes.
    StateChange,
    /// Operation entry and exit.
    Trace,
}

/// An operation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent<'a> {
    /// Operation started.
    Enter(&'a str),
    /// Operation finished.
    Exit(&'a str),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    info: Vec<(SubscriptionId, InfoCallback)>,
    error: Vec<(SubscriptionId, InfoCallback)>,
    state: Vec<(SubscriptionId, StateCallback)>,
    trace: Vec<(SubscriptionId, TraceCallback)>,
}

impl Registry {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    fn len(&self) -> usize {
        self.info.len() + self.error.len() + self.state.len() + self.trace.len()
    }
}

/// Observer registry for session events.
#[derive(Clone, Default)]
pub struct EventSink {
    inner: Arc<RwLock<Registry>>,
}

impl EventSink {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe informational messages (severity below 11).
    pub fn on_info<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let mut registry = self.inner.write();
        let id = registry.next_id();
        registry.info.push((id, Arc::new(callback)));
        id
    }

    /// Observe error messages (severity 11 and above).
    ///
    /// Errors arrive in server order relative to informational messages
    /// and rows; the request still fails with all of them once the response
    /// is complete.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let mut registry = self.inner.write();
        let id = registry.next_id();
        registry.error.push((id, Arc::new(callback)));
        id
    }

    /// Observe state changes as `(previous, current)`.
    pub fn on_state_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(SessionState, SessionState) + Send + Sync + 'static,
    {
        let mut registry = self.inner.write();
        let id = registry.next_id();
        registry.state.push((id, Arc::new(callback)));
        id
    }

    /// Observe operation entry and exit.
    pub fn on_trace<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(TraceEvent<'_>) + Send + Sync + 'static,
    {
        let mut registry = self.inner.write();
        let id = registry.next_id();
        registry.trace.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.write();
        let before = registry.len();
        registry.info.retain(|(i, _)| *i != id);
        registry.error.retain(|(i, _)| *i != id);
        registry.state.retain(|(i, _)| *i != id);
        registry.trace.retain(|(i, _)| *i != id);
        before != registry.len()
    }

    /// Number of callbacks observing `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let registry = self.inner.read();
        match kind {
            EventKind::Info => registry.info.len(),
            EventKind::Error => registry.error.len(),
            EventKind::StateChange => registry.state.len(),
            EventKind::Trace => registry.trace.len(),
        }
    }

    // Callbacks are cloned out of the lock so they may use the sink.

    pub(crate) fn emit_info(&self, message: &ServerMessage) {
        let callbacks: Vec<_> = self.inner.read().info.iter().map(|(_, c)| Arc::clone(c)).collect();
        for callback in callbacks {
            callback(message);
        }
    }

    pub(crate) fn emit_error(&self, message: &ServerMessage) {
        let callbacks: Vec<_> = self.inner.read().error.iter().map(|(_, c)| Arc::clone(c)).collect();
        for callback in callbacks {
            callback(message);
        }
    }

    /// Route a server message to the info or error callbacks by severity.
    pub(crate) fn emit_message(&self, message: &ServerMessage) {
        if message.is_error() {
            self.emit_error(message);
        } else {
            self.emit_info(message);
        }
    }

    pub(crate) fn emit_state_change(&self, previous: SessionState, current: SessionState) {
        let callbacks: Vec<_> = self.inner.read().state.iter().map(|(_, c)| Arc::clone(c)).collect();
        for callback in callbacks {
            callback(previous, current);
        }
    }

    fn emit_trace(&self, event: TraceEvent<'_>) {
        let callbacks: Vec<_> = self.inner.read().trace.iter().map(|(_, c)| Arc::clone(c)).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Emit `Enter(operation)` now and `Exit(operation)` when the guard drops.
    pub(crate) fn trace(&self, operation: &'static str) -> TraceGuard {
        self.emit_trace(TraceEvent::Enter(operation));
        TraceGuard {
            sink: self.clone(),
            operation,
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.read();
        f.debug_struct("EventSink")
            .field("info", &registry.info.len())
            .field("error", &registry.error.len())
            .field("state", &registry.state.len())
            .field("trace", &registry.trace.len())
            .finish()
    }
}

/// Emits the matching trace exit on drop.
#[must_use = "the exit event fires when the guard is dropped"]
pub(crate) struct TraceGuard {
    sink: EventSink,
    operation: &'static str,
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        self.sink.emit_trace(TraceEvent::Exit(self.operation));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_callbacks_run_in_order() {
        let sink = EventSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        sink.on_info(move |m| log.lock().push(format!("info:{}", m.text)));
        let log = Arc::clone(&seen);
        sink.on_trace(move |e| log.lock().push(format!("{e:?}")));

        {
            let _guard = sink.trace("execute");
            sink.emit_info(&ServerMessage {
                text: "X".into(),
                ..ServerMessage::default()
            });
        }

        assert_eq!(
            *seen.lock(),
            ["Enter(\"execute\")", "info:X", "Exit(\"execute\")"]
        );
    }

    #[test]
    fn test_messages_routed_by_severity() {
        let sink = EventSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        sink.on_info(move |m| log.lock().push(format!("info:{}", m.number)));
        let log = Arc::clone(&seen);
        let id = sink.on_error(move |m| log.lock().push(format!("error:{}", m.number)));

        for (number, severity) in [(5701, 10), (208, 16), (0, 10)] {
            sink.emit_message(&ServerMessage {
                number,
                severity,
                ..ServerMessage::default()
            });
        }
        assert_eq!(*seen.lock(), ["info:5701", "error:208", "info:0"]);

        assert_eq!(sink.subscriber_count(EventKind::Error), 1);
        assert!(sink.unsubscribe(id));
        assert_eq!(sink.subscriber_count(EventKind::Error), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let sink = EventSink::new();
        let id = sink.on_state_change(|_, _| {});
        assert_eq!(sink.subscriber_count(EventKind::StateChange), 1);
        assert!(sink.unsubscribe(id));
        assert!(!sink.unsubscribe(id));
        assert_eq!(sink.subscriber_count(EventKind::StateChange), 0);
    }

    #[test]
    fn test_callback_may_subscribe() {
        let sink = EventSink::new();
        let inner = sink.clone();
        sink.on_state_change(move |_, _| {
            inner.on_info(|_| {});
        });
        sink.emit_state_change(SessionState::Open, SessionState::Closed);
        assert_eq!(sink.subscriber_count(EventKind::Info), 1);
    }
}
