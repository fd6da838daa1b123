use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{CallBackend, CallConnection};
use crate::errors::CallError;
use crate::events::{CallEvent, EventEmitter};
use crate::session::{Role, Session, SessionState};

/// How the local participant got into the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    Created,
    Joined,
}

/// Result of a successful create/join request.
#[derive(Debug)]
pub struct InitiatedCall {
    pub started: Started,
    pub connection: CallConnection,
}

/// Issues the one create-or-join request of a session.
pub struct SessionInitiator {
    session: Arc<Session>,
    backend: Arc<dyn CallBackend>,
    emitter: EventEmitter,
    ring: bool,
    attempted: AtomicBool,
    in_flight: AtomicBool,
}

impl SessionInitiator {
    pub fn new(
        session: Arc<Session>,
        backend: Arc<dyn CallBackend>,
        emitter: EventEmitter,
        ring: bool,
    ) -> Self {
        Self {
            session,
            backend,
            emitter,
            ring,
            attempted: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Create or join the call, depending on the session role.
    ///
    /// Only the first invocation issues a request; later ones return
    /// `Ok(None)`, as does any call once a handle exists. Use [`Self::retry`]
    /// after a failure.
    pub async fn start(&self) -> Result<Option<InitiatedCall>, CallError> {
        if self.attempted.swap(true, Ordering::SeqCst) {
            tracing::debug!(session = %self.session.id(), "start already invoked, ignoring");
            return Ok(None);
        }
        self.issue().await
    }

    /// Re-issue the request after a failed attempt. Clears the error slot.
    pub async fn retry(&self) -> Result<Option<InitiatedCall>, CallError> {
        if self.session.call_handle().is_some() || self.in_flight.load(Ordering::SeqCst) {
            tracing::debug!(session = %self.session.id(), "retry while call exists or is starting, ignoring");
            return Ok(None);
        }
        self.attempted.store(true, Ordering::SeqCst);
        self.session.clear_error();
        self.issue().await
    }

    async fn issue(&self) -> Result<Option<InitiatedCall>, CallError> {
        let session = &self.session;
        if session.call_handle().is_some() || session.is_shutdown_started() {
            return Ok(None);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }

        let result = match session.role() {
            Role::Creator => {
                tracing::info!(
                    session = %session.id(),
                    members = session.members().len(),
                    ring = self.ring,
                    "creating call"
                );
                self.backend
                    .create_call(session.id(), session.members(), self.ring)
                    .await
                    .map(|conn| (Started::Created, conn))
                    .map_err(|e| CallError::CreationFailed(e.to_string()))
            }
            Role::Joiner => {
                tracing::info!(session = %session.id(), "joining call");
                self.backend
                    .join_call(session.id())
                    .await
                    .map(|conn| (Started::Joined, conn))
                    .map_err(|e| CallError::JoinFailed(e.to_string()))
            }
        };

        match result {
            Ok((started, connection)) => {
                session.set_call_handle(connection.handle.clone());
                self.in_flight.store(false, Ordering::SeqCst);
                self.emitter.emit(CallEvent::CallStarted {
                    role: session.role(),
                    call_id: connection.handle.call_id.clone(),
                });
                if session.advance(SessionState::Active) {
                    self.emitter
                        .emit(CallEvent::SessionStateChanged(SessionState::Active));
                }
                Ok(Some(InitiatedCall { started, connection }))
            }
            Err(err) => {
                self.in_flight.store(false, Ordering::SeqCst);
                tracing::warn!(session = %session.id(), "call request failed: {err}");
                if session.record_error(err.clone()) {
                    self.emitter.emit(CallEvent::ErrorRaised(err.clone()));
                }
                Err(err)
            }
        }
    }
}
