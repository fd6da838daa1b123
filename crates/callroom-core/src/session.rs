use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::CallHandle;
use crate::errors::CallError;
use crate::participants::Member;

/// Identifier of one call attempt; doubles as the backend call id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, CallError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CallError::Config("session id must not be empty".into()));
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Joiner,
}

/// Session progress. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Pending,
    Active,
    Ended,
}

/// Shared state of one call attempt.
///
/// `shutdown_started` and `state` are the only fields written after
/// construction by more than one task.
pub struct Session {
    id: SessionId,
    role: Role,
    members: Vec<Member>,
    state: Mutex<SessionState>,
    shutdown_started: AtomicBool,
    last_error: Mutex<Option<CallError>>,
    call: Mutex<Option<CallHandle>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Joiners never carry an invitee list; any members given are dropped.
    pub fn new(id: SessionId, role: Role, members: Vec<Member>) -> Self {
        let members = match role {
            Role::Creator => members,
            Role::Joiner => Vec::new(),
        };
        Self {
            id,
            role,
            members,
            state: Mutex::new(SessionState::Pending),
            shutdown_started: AtomicBool::new(false),
            last_error: Mutex::new(None),
            call: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// `Pending -> Ended` is allowed: a session whose create/join never
    /// produced a call handle is still torn down and ends without ever
    /// being Active. Returns false (and leaves the state untouched) for a
    /// repeated or backwards transition.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        let current = *state;
        if next <= current {
            tracing::debug!(session = %self.id, from = ?current, to = ?next, "ignoring session state transition");
            return false;
        }
        tracing::info!(session = %self.id, from = ?current, to = ?next, "session state changed");
        *state = next;
        true
    }

    pub fn is_shutdown_started(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Atomic test-and-set of the shutdown flag. Exactly one caller ever
    /// observes `true`.
    pub(crate) fn try_begin_shutdown(&self) -> bool {
        self.shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn last_error(&self) -> Option<CallError> {
        lock(&self.last_error).clone()
    }

    /// Store `err` unless an earlier error is still pending display.
    ///
    /// Returns true when `err` took the slot.
    pub fn record_error(&self, err: CallError) -> bool {
        let mut slot = lock(&self.last_error);
        if slot.is_some() {
            tracing::debug!(session = %self.id, "dropping error, slot taken: {err}");
            return false;
        }
        *slot = Some(err);
        true
    }

    pub fn clear_error(&self) -> Option<CallError> {
        lock(&self.last_error).take()
    }

    pub fn call_handle(&self) -> Option<CallHandle> {
        lock(&self.call).clone()
    }

    pub(crate) fn set_call_handle(&self, handle: CallHandle) {
        *lock(&self.call) = Some(handle);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("members", &self.members)
            .field("state", &self.state())
            .field("shutdown_started", &self.is_shutdown_started())
            .field("last_error", &self.last_error())
            .finish()
    }
}
