//! Decides when a call is torn down and runs the teardown exactly once.
//!
//! Call-state and participant notifications arrive on two independent
//! streams, possibly in parallel. Either can trigger teardown; the session's
//! `shutdown_started` flag is claimed with a compare-and-swap so only the
//! first trigger runs the sequence:
//!
//! 1. disable camera
//! 2. disable microphone
//! 3. end the call
//! 4. notify the caller that the session ended
//! 5. ask the presentation layer to close
//!
//! Failures in steps 1–3 are recorded and never stop the sequence. Each
//! backend step is bounded by a timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{CallBackend, CallStateStream, CallingState, MediaDevice, ParticipantStream};
use crate::errors::{BackendError, CallError};
use crate::events::{CallEvent, EventEmitter, SessionEndedSink};
use crate::participants::{ParticipantChange, ParticipantSnapshot};
use crate::session::{Session, SessionState};

/// Upper bounds for the backend steps of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownTimeouts {
    pub device_disable: Duration,
    pub end_call: Duration,
}

impl Default for TeardownTimeouts {
    fn default() -> Self {
        Self {
            device_disable: Duration::from_secs(5),
            end_call: Duration::from_secs(10),
        }
    }
}

/// `Observing` is the not-yet-triggered state; both later phases are
/// entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Observing,
    ShuttingDown,
    Closed,
}

/// Why teardown was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    CallIdle,
    ParticipantsGone,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sole owner of the teardown decision for one session.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<Session>,
    backend: Arc<dyn CallBackend>,
    sink: Arc<dyn SessionEndedSink>,
    emitter: EventEmitter,
    timeouts: TeardownTimeouts,
    phase: watch::Sender<CoordinatorPhase>,
    calling_state: Mutex<Option<CallingState>>,
    participants: Mutex<ParticipantSnapshot>,
    close_signaled: AtomicBool,
}

impl LifecycleCoordinator {
    pub fn new(
        session: Arc<Session>,
        backend: Arc<dyn CallBackend>,
        sink: Arc<dyn SessionEndedSink>,
        emitter: EventEmitter,
        timeouts: TeardownTimeouts,
    ) -> Self {
        let (phase, _) = watch::channel(CoordinatorPhase::Observing);
        Self {
            inner: Arc::new(Inner {
                session,
                backend,
                sink,
                emitter,
                timeouts,
                phase,
                calling_state: Mutex::new(None),
                participants: Mutex::new(ParticipantSnapshot::empty()),
                close_signaled: AtomicBool::new(false),
            }),
        }
    }

    pub fn phase(&self) -> CoordinatorPhase {
        *self.inner.phase.borrow()
    }

    /// Most recent calling state seen before teardown began.
    pub fn calling_state(&self) -> Option<CallingState> {
        *lock(&self.inner.calling_state)
    }

    /// Most recent participant snapshot seen before teardown began.
    pub fn participants(&self) -> ParticipantSnapshot {
        lock(&self.inner.participants).clone()
    }

    /// Consume both notification streams on their own tasks.
    ///
    /// Each task stops once teardown has begun or its stream ends.
    pub fn observe(
        &self,
        call_states: CallStateStream,
        participants: ParticipantStream,
    ) -> Vec<JoinHandle<()>> {
        let states = {
            let this = self.clone();
            tokio::spawn(async move {
                this.pump(call_states, |c, state| c.on_calling_state(state)).await;
                tracing::debug!(session = %this.inner.session.id(), "call-state observer ended");
            })
        };
        let members = {
            let this = self.clone();
            tokio::spawn(async move {
                this.pump(participants, |c, change| c.on_participants(change)).await;
                tracing::debug!(session = %this.inner.session.id(), "participant observer ended");
            })
        };
        vec![states, members]
    }

    async fn pump<T>(&self, mut stream: BoxStream<'static, T>, handle: impl Fn(&Self, T) -> bool) {
        let mut phase = self.inner.phase.subscribe();
        loop {
            let observing = *phase.borrow_and_update() == CoordinatorPhase::Observing;
            if !observing {
                break;
            }
            tokio::select! {
                next = stream.next() => match next {
                    Some(item) => {
                        handle(self, item);
                    }
                    None => break,
                },
                changed = phase.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Handle one call-state notification. Returns true if it triggered
    /// teardown.
    pub fn on_calling_state(&self, state: CallingState) -> bool {
        let inner = &self.inner;
        if inner.session.is_shutdown_started() {
            tracing::debug!(session = %inner.session.id(), ?state, "call state ignored during shutdown");
            return false;
        }
        *lock(&inner.calling_state) = Some(state);
        inner.emitter.emit(CallEvent::CallingStateChanged(state));
        if state.is_idle() {
            return self.trigger(Trigger::CallIdle);
        }
        false
    }

    /// Handle one participant-set notification. Returns true if it
    /// triggered teardown.
    pub fn on_participants(&self, change: ParticipantChange) -> bool {
        let inner = &self.inner;
        if inner.session.is_shutdown_started() {
            tracing::debug!(
                session = %inner.session.id(),
                count = change.current.len(),
                "participant change ignored during shutdown"
            );
            return false;
        }
        tracing::debug!(
            session = %inner.session.id(),
            previous = change.previous.len(),
            current = change.current.len(),
            "participants changed"
        );
        *lock(&inner.participants) = change.current.clone();
        inner
            .emitter
            .emit(CallEvent::ParticipantsChanged(change.current.clone()));
        if change.ends_call() {
            return self.trigger(Trigger::ParticipantsGone);
        }
        false
    }

    /// Ask the presentation layer to close. Delivered at most once.
    pub fn request_close(&self) -> bool {
        if self
            .inner
            .close_signaled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        tracing::info!(session = %self.inner.session.id(), "requesting close");
        self.inner.emitter.emit(CallEvent::CloseRequested);
        true
    }

    /// Resolves once the teardown sequence has completed.
    pub async fn wait_closed(&self) {
        let mut phase = self.inner.phase.subscribe();
        loop {
            let closed = *phase.borrow_and_update() == CoordinatorPhase::Closed;
            if closed || phase.changed().await.is_err() {
                return;
            }
        }
    }

    fn trigger(&self, trigger: Trigger) -> bool {
        let inner = &self.inner;
        if !inner.session.try_begin_shutdown() {
            tracing::debug!(session = %inner.session.id(), ?trigger, "teardown already started");
            return false;
        }
        tracing::info!(session = %inner.session.id(), ?trigger, "teardown triggered");
        inner.phase.send_replace(CoordinatorPhase::ShuttingDown);
        inner.emitter.emit(CallEvent::ShutdownStarted);

        let this = self.clone();
        tokio::spawn(async move { this.teardown().await });
        true
    }

    async fn teardown(&self) {
        let inner = &self.inner;
        let session = &inner.session;

        match session.call_handle() {
            Some(handle) => {
                let limit = inner.timeouts.device_disable;
                if let Err(e) = bounded(limit, inner.backend.disable_camera(&handle)).await {
                    self.report(CallError::DeviceDisableFailed {
                        device: MediaDevice::Camera,
                        reason: e.to_string(),
                    });
                }
                if let Err(e) = bounded(limit, inner.backend.disable_microphone(&handle)).await {
                    self.report(CallError::DeviceDisableFailed {
                        device: MediaDevice::Microphone,
                        reason: e.to_string(),
                    });
                }
                match bounded(inner.timeouts.end_call, inner.backend.end_call(&handle)).await {
                    Ok(()) => tracing::info!(session = %session.id(), "call ended"),
                    Err(e) => self.report(CallError::EndCallFailed(e.to_string())),
                }
            }
            None => {
                tracing::debug!(session = %session.id(), "no call handle, nothing to release");
            }
        }

        inner.sink.on_session_ended(session.id());
        self.request_close();

        if session.advance(SessionState::Ended) {
            inner
                .emitter
                .emit(CallEvent::SessionStateChanged(SessionState::Ended));
        }
        inner.phase.send_replace(CoordinatorPhase::Closed);
        tracing::info!(session = %session.id(), "teardown complete");
    }

    fn report(&self, err: CallError) {
        let session = &self.inner.session;
        tracing::warn!(session = %session.id(), "teardown step failed: {err}");
        if session.record_error(err.clone()) {
            self.inner.emitter.emit(CallEvent::ErrorRaised(err));
        }
    }
}

async fn bounded<F>(limit: Duration, step: F) -> Result<(), BackendError>
where
    F: Future<Output = Result<(), BackendError>>,
{
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::new(format!("timed out after {limit:?}"))),
    }
}
