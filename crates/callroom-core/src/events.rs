use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::CallingState;
use crate::errors::CallError;
use crate::participants::ParticipantSnapshot;
use crate::session::{Role, SessionId, SessionState};

/// Events emitted by the core to the presentation layer.
#[derive(Debug, Clone)]
pub enum CallEvent {
    SessionStateChanged(SessionState),
    /// The initiator obtained a call handle, by creating or joining.
    CallStarted { role: Role, call_id: String },
    CallingStateChanged(CallingState),
    ParticipantsChanged(ParticipantSnapshot),
    /// A displayable error took the session's error slot.
    ErrorRaised(CallError),
    ShutdownStarted,
    /// The call screen should be dismissed.
    CloseRequested,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Receives the single end-of-session notification for the caller
/// (the chat room that opened the call screen).
pub trait SessionEndedSink: Send + Sync {
    fn on_session_ended(&self, session_id: &SessionId);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn CallEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: CallEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl CallEventListener for CountingListener {
        fn on_event(&self, _event: CallEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(CallEvent::ShutdownStarted);

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    struct EventCapture {
        events: Arc<Mutex<Vec<CallEvent>>>,
    }

    impl CallEventListener for EventCapture {
        fn on_event(&self, event: CallEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn emitter_delivers_correct_events() {
        let emitter = EventEmitter::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        emitter.add_listener(Arc::new(EventCapture { events: events.clone() }));

        emitter.emit(CallEvent::CallingStateChanged(CallingState::Joined));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        match &captured[0] {
            CallEvent::CallingStateChanged(state) => assert_eq!(*state, CallingState::Joined),
            other => panic!("expected CallingStateChanged, got {other:?}"),
        }
    }
}
