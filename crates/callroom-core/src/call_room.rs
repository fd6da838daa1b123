use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::backend::CallBackend;
use crate::coordinator::{CoordinatorPhase, LifecycleCoordinator};
use crate::errors::CallError;
use crate::events::{CallEventListener, EventEmitter, SessionEndedSink};
use crate::initiator::{InitiatedCall, SessionInitiator};
use crate::participants::{LocalUser, Member};
use crate::session::{Role, Session, SessionId};
use crate::settings::CallSettings;

/// What the call screen should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallView {
    /// No call handle yet.
    Loading,
    InCall,
}

/// Parameters for opening a call screen.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_id: Option<String>,
    pub role: Role,
    pub members: Vec<Member>,
}

impl SessionRequest {
    /// Start a new call, inviting every chat user except `local`.
    pub fn create(session_id: Option<String>, chat_users: Vec<Member>, local: &LocalUser) -> Self {
        Self {
            session_id,
            role: Role::Creator,
            members: Member::invitees_from(chat_users, &local.id),
        }
    }

    /// Join the call announced in the chat.
    pub fn join(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            role: Role::Joiner,
            members: Vec::new(),
        }
    }
}

/// One call screen: a session with its initiator and coordinator.
pub struct CallRoom {
    session: Arc<Session>,
    emitter: EventEmitter,
    initiator: SessionInitiator,
    coordinator: LifecycleCoordinator,
    observers: Mutex<Vec<JoinHandle<()>>>,
}

impl CallRoom {
    pub fn new(
        request: SessionRequest,
        backend: Arc<dyn CallBackend>,
        sink: Arc<dyn SessionEndedSink>,
        settings: &CallSettings,
    ) -> Result<Self, CallError> {
        let session_id = match request.session_id {
            Some(id) => SessionId::new(id)?,
            None if request.role == Role::Creator => SessionId::generate(),
            None => return Err(CallError::Config("joining requires a session id".into())),
        };
        let session = Arc::new(Session::new(session_id, request.role, request.members));
        tracing::info!(session = %session.id(), role = ?session.role(), "call room opened");

        let emitter = EventEmitter::new();
        let initiator = SessionInitiator::new(
            session.clone(),
            backend.clone(),
            emitter.clone(),
            settings.ring_on_create,
        );
        let coordinator = LifecycleCoordinator::new(
            session.clone(),
            backend,
            sink,
            emitter.clone(),
            settings.teardown_timeouts(),
        );
        Ok(Self {
            session,
            emitter,
            initiator,
            coordinator,
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Register a listener for call events.
    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.coordinator.phase()
    }

    pub fn view(&self) -> CallView {
        if self.session.call_handle().is_some() {
            CallView::InCall
        } else {
            CallView::Loading
        }
    }

    /// Create or join the call and start observing it. Safe to call on
    /// every appearance of the screen.
    pub async fn start(&self) -> Result<(), CallError> {
        let call = self.initiator.start().await?;
        self.observe(call);
        Ok(())
    }

    /// User-initiated retry after a failed start.
    pub async fn retry(&self) -> Result<(), CallError> {
        let call = self.initiator.retry().await?;
        self.observe(call);
        Ok(())
    }

    /// The user dismissed the error alert: clear it and close the screen.
    /// Does nothing when no error is pending, so a later teardown still
    /// delivers its own close signal.
    pub fn acknowledge_error(&self) {
        let Some(err) = self.session.clear_error() else {
            tracing::debug!(session = %self.session.id(), "no pending error to acknowledge");
            return;
        };
        tracing::info!(session = %self.session.id(), "error acknowledged: {err}");
        self.coordinator.request_close();
    }

    pub async fn wait_closed(&self) {
        self.coordinator.wait_closed().await;
    }

    fn observe(&self, call: Option<InitiatedCall>) {
        let Some(call) = call else {
            return;
        };
        tracing::info!(session = %self.session.id(), started = ?call.started, "observing call");
        let tasks = self
            .coordinator
            .observe(call.connection.call_states, call.connection.participants);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
    }
}

impl Drop for CallRoom {
    fn drop(&mut self) {
        let observers = self.observers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in observers.drain(..) {
            handle.abort();
        }
    }
}
