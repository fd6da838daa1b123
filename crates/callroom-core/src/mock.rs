//! Scriptable in-memory call backend.
//!
//! Every backend call, the caller notification and the close signal are
//! appended to one shared [`JournalEntry`] log so tests can assert on the
//! exact order of a teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{CallBackend, CallConnection, CallHandle, CallingState, channel_stream};
use crate::errors::BackendError;
use crate::events::{CallEvent, CallEventListener, SessionEndedSink};
use crate::participants::{Member, ParticipantChange};
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateCall,
    JoinCall,
    DisableCamera,
    DisableMicrophone,
    EndCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    CreateCall {
        session_id: String,
        member_ids: Vec<String>,
        ring: bool,
    },
    JoinCall {
        session_id: String,
    },
    DisableCamera,
    DisableMicrophone,
    EndCall,
    SessionEnded(String),
    CloseRequested,
}

impl JournalEntry {
    fn op(&self) -> Option<MockOp> {
        match self {
            JournalEntry::CreateCall { .. } => Some(MockOp::CreateCall),
            JournalEntry::JoinCall { .. } => Some(MockOp::JoinCall),
            JournalEntry::DisableCamera => Some(MockOp::DisableCamera),
            JournalEntry::DisableMicrophone => Some(MockOp::DisableMicrophone),
            JournalEntry::EndCall => Some(MockOp::EndCall),
            JournalEntry::SessionEnded(_) | JournalEntry::CloseRequested => None,
        }
    }
}

/// Senders feeding the notification streams of the most recent call.
#[derive(Clone)]
pub struct StreamFeeds {
    pub call_states: mpsc::UnboundedSender<CallingState>,
    pub participants: mpsc::UnboundedSender<ParticipantChange>,
}

type Journal = Arc<Mutex<Vec<JournalEntry>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MockCallBackend {
    journal: Journal,
    failures: Mutex<HashMap<MockOp, String>>,
    stalls: Mutex<HashMap<MockOp, Duration>>,
    feeds: Mutex<Option<StreamFeeds>>,
}

impl MockCallBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `op` fail with `msg`.
    pub fn fail(&self, op: MockOp, msg: impl Into<String>) {
        lock(&self.failures).insert(op, msg.into());
    }

    /// Let `op` succeed again.
    pub fn recover(&self, op: MockOp) {
        lock(&self.failures).remove(&op);
    }

    /// Delay `op` by `delay` before it completes.
    pub fn stall(&self, op: MockOp, delay: Duration) {
        lock(&self.stalls).insert(op, delay);
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.journal).clone()
    }

    pub fn count(&self, op: MockOp) -> usize {
        lock(&self.journal)
            .iter()
            .filter(|e| e.op() == Some(op))
            .count()
    }

    /// Stream senders of the last created or joined call.
    pub fn feeds(&self) -> Option<StreamFeeds> {
        lock(&self.feeds).clone()
    }

    /// A caller notification sink writing into this backend's journal.
    pub fn session_sink(&self) -> Arc<JournalSink> {
        Arc::new(JournalSink {
            journal: self.journal.clone(),
        })
    }

    /// A presentation listener recording close requests into the journal.
    pub fn close_listener(&self) -> Arc<JournalSink> {
        self.session_sink()
    }

    async fn perform(&self, entry: JournalEntry) -> Result<(), BackendError> {
        let op = entry.op();
        lock(&self.journal).push(entry);
        let Some(op) = op else {
            return Ok(());
        };
        let stall = lock(&self.stalls).get(&op).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.failures).get(&op) {
            Some(msg) => Err(BackendError::new(msg.clone())),
            None => Ok(()),
        }
    }

    fn connect(&self, session_id: &SessionId) -> CallConnection {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (participant_tx, participant_rx) = mpsc::unbounded_channel();
        *lock(&self.feeds) = Some(StreamFeeds {
            call_states: state_tx,
            participants: participant_tx,
        });
        CallConnection {
            handle: CallHandle::new(session_id.as_str()),
            call_states: channel_stream(state_rx),
            participants: channel_stream(participant_rx),
        }
    }
}

#[async_trait]
impl CallBackend for MockCallBackend {
    async fn create_call(
        &self,
        session_id: &SessionId,
        members: &[Member],
        ring: bool,
    ) -> Result<CallConnection, BackendError> {
        self.perform(JournalEntry::CreateCall {
            session_id: session_id.to_string(),
            member_ids: members.iter().map(|m| m.id.clone()).collect(),
            ring,
        })
        .await?;
        Ok(self.connect(session_id))
    }

    async fn join_call(&self, session_id: &SessionId) -> Result<CallConnection, BackendError> {
        self.perform(JournalEntry::JoinCall {
            session_id: session_id.to_string(),
        })
        .await?;
        Ok(self.connect(session_id))
    }

    async fn disable_camera(&self, _handle: &CallHandle) -> Result<(), BackendError> {
        self.perform(JournalEntry::DisableCamera).await
    }

    async fn disable_microphone(&self, _handle: &CallHandle) -> Result<(), BackendError> {
        self.perform(JournalEntry::DisableMicrophone).await
    }

    async fn end_call(&self, _handle: &CallHandle) -> Result<(), BackendError> {
        self.perform(JournalEntry::EndCall).await
    }
}

/// Records session-ended notifications and close requests.
pub struct JournalSink {
    journal: Journal,
}

impl SessionEndedSink for JournalSink {
    fn on_session_ended(&self, session_id: &SessionId) {
        lock(&self.journal).push(JournalEntry::SessionEnded(session_id.to_string()));
    }
}

impl CallEventListener for JournalSink {
    fn on_event(&self, event: CallEvent) {
        if let CallEvent::CloseRequested = event {
            lock(&self.journal).push(JournalEntry::CloseRequested);
        }
    }
}

/// Collects every emitted event.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<CallEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CallEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, pred: impl Fn(&CallEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }
}

impl CallEventListener for EventRecorder {
    fn on_event(&self, event: CallEvent) {
        lock(&self.events).push(event);
    }
}
