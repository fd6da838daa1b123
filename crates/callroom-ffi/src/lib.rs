//! UniFFI bindings for callroom-core.
//!
//! Provides a CallRoomClient object that wraps one CallRoom for the native
//! call screen. The native shell implements `CallBackendBridge` over the
//! vendor video SDK and forwards the SDK's calling-state and participant
//! changes through `push_calling_state` / `push_participants`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use callroom_core::{
    BackendError, CallBackend, CallConnection, CallHandle, CallRoom, LocalUser, ParticipantChange,
    ParticipantSnapshot, SessionId, SessionRequest, SettingsStore,
    backend::channel_stream,
    CallError as CoreCallError, CallEvent as CoreCallEvent, CallView as CoreCallView,
    CallingState as CoreCallingState, CoordinatorPhase as CoreCoordinatorPhase,
    MediaDevice as CoreMediaDevice, Member as CoreMember, Role as CoreRole,
    SessionState as CoreSessionState,
};
use tokio::sync::mpsc;

uniffi::include_scaffolding!("callroom");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using CallRoomClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("callroom_core=debug,callroom_ffi=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Joiner,
}

impl From<CoreRole> for Role {
    fn from(r: CoreRole) -> Self {
        match r {
            CoreRole::Creator => Self::Creator,
            CoreRole::Joiner => Self::Joiner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Ended,
}

impl From<CoreSessionState> for SessionState {
    fn from(s: CoreSessionState) -> Self {
        match s {
            CoreSessionState::Pending => Self::Pending,
            CoreSessionState::Active => Self::Active,
            CoreSessionState::Ended => Self::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingState {
    Idle,
    Connecting,
    Joined,
    Reconnecting,
}

impl From<CoreCallingState> for CallingState {
    fn from(s: CoreCallingState) -> Self {
        match s {
            CoreCallingState::Idle => Self::Idle,
            CoreCallingState::Connecting => Self::Connecting,
            CoreCallingState::Joined => Self::Joined,
            CoreCallingState::Reconnecting => Self::Reconnecting,
        }
    }
}

impl From<CallingState> for CoreCallingState {
    fn from(s: CallingState) -> Self {
        match s {
            CallingState::Idle => Self::Idle,
            CallingState::Connecting => Self::Connecting,
            CallingState::Joined => Self::Joined,
            CallingState::Reconnecting => Self::Reconnecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Observing,
    ShuttingDown,
    Closed,
}

impl From<CoreCoordinatorPhase> for CoordinatorPhase {
    fn from(p: CoreCoordinatorPhase) -> Self {
        match p {
            CoreCoordinatorPhase::Observing => Self::Observing,
            CoreCoordinatorPhase::ShuttingDown => Self::ShuttingDown,
            CoreCoordinatorPhase::Closed => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallView {
    Loading,
    InCall,
}

impl From<CoreCallView> for CallView {
    fn from(v: CoreCallView) -> Self {
        match v {
            CoreCallView::Loading => Self::Loading,
            CoreCallView::InCall => Self::InCall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDevice {
    Camera,
    Microphone,
}

impl From<CoreMediaDevice> for MediaDevice {
    fn from(d: CoreMediaDevice) -> Self {
        match d {
            CoreMediaDevice::Camera => Self::Camera,
            CoreMediaDevice::Microphone => Self::Microphone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub name: Option<String>,
}

impl From<CoreMember> for Member {
    fn from(m: CoreMember) -> Self {
        Self {
            id: m.id,
            name: m.name,
        }
    }
}

impl From<Member> for CoreMember {
    fn from(m: Member) -> Self {
        CoreMember::new(m.id, m.name)
    }
}

fn to_snapshot(members: Vec<Member>) -> ParticipantSnapshot {
    ParticipantSnapshot::new(members.into_iter().map(CoreMember::from).collect())
}

#[derive(Debug, Clone)]
pub enum CallRoomEvent {
    SessionStateChanged { state: SessionState },
    CallStarted { role: Role, call_id: String },
    CallingStateChanged { state: CallingState },
    ParticipantsChanged { participants: Vec<Member> },
    ErrorRaised { message: String },
    ShutdownStarted,
    CloseRequested,
}

impl From<CoreCallEvent> for CallRoomEvent {
    fn from(e: CoreCallEvent) -> Self {
        match e {
            CoreCallEvent::SessionStateChanged(state) => Self::SessionStateChanged {
                state: state.into(),
            },
            CoreCallEvent::CallStarted { role, call_id } => Self::CallStarted {
                role: role.into(),
                call_id,
            },
            CoreCallEvent::CallingStateChanged(state) => Self::CallingStateChanged {
                state: state.into(),
            },
            CoreCallEvent::ParticipantsChanged(snapshot) => Self::ParticipantsChanged {
                participants: snapshot.members().iter().cloned().map(Member::from).collect(),
            },
            CoreCallEvent::ErrorRaised(err) => Self::ErrorRaised {
                message: err.to_string(),
            },
            CoreCallEvent::ShutdownStarted => Self::ShutdownStarted,
            CoreCallEvent::CloseRequested => Self::CloseRequested,
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CallRoomError {
    #[error("Call creation failed: {msg}")]
    CreationFailed { msg: String },
    #[error("Joining call failed: {msg}")]
    JoinFailed { msg: String },
    #[error("Disabling {device:?} failed: {msg}")]
    DeviceDisableFailed { device: MediaDevice, msg: String },
    #[error("Ending call failed: {msg}")]
    EndCallFailed { msg: String },
    #[error("Configuration error: {msg}")]
    Config { msg: String },
}

impl From<CoreCallError> for CallRoomError {
    fn from(e: CoreCallError) -> Self {
        tracing::error!("CallError: {e}");
        match e {
            CoreCallError::CreationFailed(msg) => Self::CreationFailed { msg },
            CoreCallError::JoinFailed(msg) => Self::JoinFailed { msg },
            CoreCallError::DeviceDisableFailed { device, reason } => Self::DeviceDisableFailed {
                device: device.into(),
                msg: reason,
            },
            CoreCallError::EndCallFailed(msg) => Self::EndCallFailed { msg },
            CoreCallError::Config(msg) => Self::Config { msg },
        }
    }
}

/// Error thrown by the native backend implementation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{msg}")]
    Failed { msg: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for BridgeError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Failed { msg: e.reason }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

/// Vendor SDK operations, implemented natively. Methods may block until
/// the SDK answers; they are always called off the async workers.
pub trait CallBackendBridge: Send + Sync {
    /// Returns the id of the created call.
    fn create_call(&self, session_id: String, members: Vec<Member>, ring: bool) -> Result<String, BridgeError>;
    /// Returns the id of the joined call.
    fn join_call(&self, session_id: String) -> Result<String, BridgeError>;
    fn disable_camera(&self, call_id: String) -> Result<(), BridgeError>;
    fn disable_microphone(&self, call_id: String) -> Result<(), BridgeError>;
    fn end_call(&self, call_id: String) -> Result<(), BridgeError>;
}

pub trait CallRoomListener: Send + Sync {
    fn on_event(&self, event: CallRoomEvent);
}

pub trait SessionEndedCallback: Send + Sync {
    fn on_session_ended(&self, session_id: String);
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn CallRoomListener>,
}

impl callroom_core::CallEventListener for BridgeListener {
    fn on_event(&self, event: CoreCallEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

struct BridgeSink {
    callback: Box<dyn SessionEndedCallback>,
}

impl callroom_core::SessionEndedSink for BridgeSink {
    fn on_session_ended(&self, session_id: &SessionId) {
        self.callback.on_session_ended(session_id.to_string());
    }
}

/// Senders for the notification streams of the current call.
struct Feeds {
    call_states: mpsc::UnboundedSender<CoreCallingState>,
    participants: mpsc::UnboundedSender<ParticipantChange>,
}

type SharedFeeds = Arc<Mutex<Option<Feeds>>>;

/// Adapts the blocking native bridge to the async core backend.
struct BridgedBackend {
    bridge: Arc<dyn CallBackendBridge>,
    feeds: SharedFeeds,
}

impl BridgedBackend {
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CallBackendBridge) -> Result<T, BridgeError> + Send + 'static,
    {
        let bridge = self.bridge.clone();
        tokio::task::spawn_blocking(move || f(bridge.as_ref()))
            .await
            .map_err(|e| BackendError::new(format!("{op} did not complete: {e}")))?
            .map_err(|e| {
                tracing::warn!("{op} failed: {e}");
                BackendError::new(e.to_string())
            })
    }

    fn connect(&self, call_id: String) -> CallConnection {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (participant_tx, participant_rx) = mpsc::unbounded_channel();
        *lock(&self.feeds) = Some(Feeds {
            call_states: state_tx,
            participants: participant_tx,
        });
        CallConnection {
            handle: CallHandle::new(call_id),
            call_states: channel_stream(state_rx),
            participants: channel_stream(participant_rx),
        }
    }
}

#[async_trait]
impl CallBackend for BridgedBackend {
    async fn create_call(
        &self,
        session_id: &SessionId,
        members: &[CoreMember],
        ring: bool,
    ) -> Result<CallConnection, BackendError> {
        let id = session_id.to_string();
        let members: Vec<Member> = members.iter().cloned().map(Member::from).collect();
        let call_id = self
            .call("create_call", move |b| b.create_call(id, members, ring))
            .await?;
        Ok(self.connect(call_id))
    }

    async fn join_call(&self, session_id: &SessionId) -> Result<CallConnection, BackendError> {
        let id = session_id.to_string();
        let call_id = self.call("join_call", move |b| b.join_call(id)).await?;
        Ok(self.connect(call_id))
    }

    async fn disable_camera(&self, handle: &CallHandle) -> Result<(), BackendError> {
        let call_id = handle.call_id.clone();
        self.call("disable_camera", move |b| b.disable_camera(call_id)).await
    }

    async fn disable_microphone(&self, handle: &CallHandle) -> Result<(), BackendError> {
        let call_id = handle.call_id.clone();
        self.call("disable_microphone", move |b| b.disable_microphone(call_id))
            .await
    }

    async fn end_call(&self, handle: &CallHandle) -> Result<(), BackendError> {
        let call_id = handle.call_id.clone();
        self.call("end_call", move |b| b.end_call(call_id)).await
    }
}

// ── CallRoomClient: main FFI object ───────────────────────────────────

pub struct CallRoomClient {
    room: CallRoom,
    feeds: SharedFeeds,
    local_user: LocalUser,
    outgoing_ring_tone: Option<String>,
    /// Taken in `Drop`; the shell may release the client from a listener
    /// running on one of this runtime's workers.
    rt: Option<tokio::runtime::Runtime>,
}

impl CallRoomClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_dir: String,
        local_user_id: String,
        local_display_name: Option<String>,
        session_id: Option<String>,
        create: bool,
        chat_users: Vec<Member>,
        backend: Box<dyn CallBackendBridge>,
        on_ended: Box<dyn SessionEndedCallback>,
    ) -> Result<Self, CallRoomError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| CallRoomError::Config {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let settings = SettingsStore::new(&data_dir).get();
        let local_user = LocalUser::resolve(local_user_id, local_display_name, &settings);

        let request = if create {
            let users = chat_users.into_iter().map(CoreMember::from).collect();
            SessionRequest::create(session_id, users, &local_user)
        } else {
            SessionRequest {
                session_id,
                role: CoreRole::Joiner,
                members: Vec::new(),
            }
        };

        let feeds: SharedFeeds = Arc::new(Mutex::new(None));
        let backend = Arc::new(BridgedBackend {
            bridge: Arc::from(backend),
            feeds: feeds.clone(),
        });
        let sink = Arc::new(BridgeSink { callback: on_ended });
        let room = CallRoom::new(request, backend, sink, &settings)?;
        tracing::info!(
            session = %room.session().id(),
            user = %local_user.display_name,
            "CallRoomClient created"
        );

        Ok(Self {
            room,
            feeds,
            local_user,
            outgoing_ring_tone: settings.outgoing_ring_tone,
            rt: Some(rt),
        })
    }

    fn runtime(&self) -> Result<&tokio::runtime::Runtime, CallRoomError> {
        self.rt.as_ref().ok_or_else(|| CallRoomError::Config {
            msg: "runtime already shut down".into(),
        })
    }

    pub fn add_listener(&self, listener: Box<dyn CallRoomListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.room.add_listener(bridge);
    }

    /// Call from the screen's appear hook; repeated calls are ignored.
    pub fn start(&self) -> Result<(), CallRoomError> {
        self.runtime()?.block_on(self.room.start()).map_err(CallRoomError::from)
    }

    pub fn retry(&self) -> Result<(), CallRoomError> {
        self.runtime()?.block_on(self.room.retry()).map_err(CallRoomError::from)
    }

    pub fn push_calling_state(&self, state: CallingState) {
        let feeds = lock(&self.feeds);
        match feeds.as_ref() {
            Some(f) => {
                if f.call_states.send(state.into()).is_err() {
                    tracing::debug!(?state, "calling state dropped, call no longer observed");
                }
            }
            None => tracing::debug!(?state, "calling state dropped, no call yet"),
        }
    }

    pub fn push_participants(&self, previous: Vec<Member>, current: Vec<Member>) {
        let change = ParticipantChange::new(to_snapshot(previous), to_snapshot(current));
        let feeds = lock(&self.feeds);
        match feeds.as_ref() {
            Some(f) => {
                if f.participants.send(change).is_err() {
                    tracing::debug!("participant change dropped, call no longer observed");
                }
            }
            None => tracing::debug!("participant change dropped, no call yet"),
        }
    }

    pub fn acknowledge_error(&self) {
        self.room.acknowledge_error();
    }

    pub fn session_id(&self) -> String {
        self.room.session().id().to_string()
    }

    pub fn local_display_name(&self) -> String {
        self.local_user.display_name.clone()
    }

    pub fn outgoing_ring_tone(&self) -> Option<String> {
        self.outgoing_ring_tone.clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.room.session().state().into()
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.room.phase().into()
    }

    pub fn view(&self) -> CallView {
        self.room.view().into()
    }

    pub fn last_error(&self) -> Option<String> {
        self.room.session().last_error().map(|e| e.to_string())
    }
}

impl Drop for CallRoomClient {
    fn drop(&mut self) {
        if let Some(rt) = self.rt.take() {
            tracing::debug!(session = %self.room.session().id(), "CallRoomClient dropped");
            rt.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct FakeBridge {
        calls: Arc<Mutex<Vec<String>>>,
        fail_end_call: bool,
    }

    impl CallBackendBridge for FakeBridge {
        fn create_call(&self, session_id: String, members: Vec<Member>, ring: bool) -> Result<String, BridgeError> {
            let ids: Vec<String> = members.into_iter().map(|m| m.id).collect();
            lock(&self.calls).push(format!("create {session_id} {} ring={ring}", ids.join(",")));
            Ok(session_id)
        }

        fn join_call(&self, session_id: String) -> Result<String, BridgeError> {
            lock(&self.calls).push(format!("join {session_id}"));
            Ok(session_id)
        }

        fn disable_camera(&self, _call_id: String) -> Result<(), BridgeError> {
            lock(&self.calls).push("camera".into());
            Ok(())
        }

        fn disable_microphone(&self, _call_id: String) -> Result<(), BridgeError> {
            lock(&self.calls).push("microphone".into());
            Ok(())
        }

        fn end_call(&self, _call_id: String) -> Result<(), BridgeError> {
            lock(&self.calls).push("end".into());
            if self.fail_end_call {
                return Err(BridgeError::Failed { msg: "network down".into() });
            }
            Ok(())
        }
    }

    struct EndedRecorder {
        ended: Arc<Mutex<Vec<String>>>,
    }

    impl SessionEndedCallback for EndedRecorder {
        fn on_session_ended(&self, session_id: String) {
            lock(&self.ended).push(session_id);
        }
    }

    fn wait_for_phase(client: &CallRoomClient, phase: CoordinatorPhase) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while client.phase() != phase {
            assert!(Instant::now() < deadline, "timed out waiting for {phase:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn client(
        data_dir: &Path,
        create: bool,
        fail_end_call: bool,
    ) -> (CallRoomClient, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(Mutex::new(Vec::new()));
        let client = CallRoomClient::new(
            data_dir.to_string_lossy().into_owned(),
            "me".into(),
            None,
            Some("call-9".into()),
            create,
            vec![
                Member { id: "me".into(), name: Some("Me".into()) },
                Member { id: "a".into(), name: Some("Ann".into()) },
            ],
            Box::new(FakeBridge {
                calls: calls.clone(),
                fail_end_call,
            }),
            Box::new(EndedRecorder { ended: ended.clone() }),
        )
        .unwrap();
        (client, calls, ended)
    }

    #[test]
    fn create_then_idle_tears_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls, ended) = client(dir.path(), true, false);
        assert_eq!(client.view(), CallView::Loading);
        assert_eq!(client.local_display_name(), "User");

        client.start().unwrap();
        client.start().unwrap();
        assert_eq!(client.view(), CallView::InCall);
        assert_eq!(client.session_state(), SessionState::Active);

        client.push_calling_state(CallingState::Joined);
        client.push_calling_state(CallingState::Idle);
        wait_for_phase(&client, CoordinatorPhase::Closed);
        client.push_calling_state(CallingState::Idle);

        assert_eq!(
            *lock(&calls),
            vec!["create call-9 a ring=true", "camera", "microphone", "end"]
        );
        assert_eq!(*lock(&ended), vec!["call-9"]);
        assert_eq!(client.session_state(), SessionState::Ended);
        assert_eq!(client.last_error(), None);
    }

    #[test]
    fn failed_end_call_still_reports_session_end() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls, ended) = client(dir.path(), false, true);

        client.start().unwrap();
        client.push_participants(
            vec![Member { id: "a".into(), name: None }],
            vec![],
        );
        wait_for_phase(&client, CoordinatorPhase::Closed);

        assert_eq!(*lock(&calls), vec!["join call-9", "camera", "microphone", "end"]);
        assert_eq!(*lock(&ended), vec!["call-9"]);
        assert!(client.last_error().unwrap().contains("network down"));
    }

    #[test]
    fn push_before_start_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls, ended) = client(dir.path(), false, false);
        client.push_calling_state(CallingState::Idle);
        assert_eq!(client.phase(), CoordinatorPhase::Observing);
        assert!(lock(&calls).is_empty());
        assert!(lock(&ended).is_empty());
    }

    struct DropOnClose {
        slot: Arc<Mutex<Option<CallRoomClient>>>,
        states: Arc<Mutex<Vec<SessionState>>>,
    }

    impl CallRoomListener for DropOnClose {
        fn on_event(&self, event: CallRoomEvent) {
            match event {
                CallRoomEvent::CloseRequested => {
                    let client = lock(&self.slot).take();
                    drop(client);
                }
                CallRoomEvent::SessionStateChanged { state } => lock(&self.states).push(state),
                _ => {}
            }
        }
    }

    #[test]
    fn releasing_client_on_close_finishes_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls, ended) = client(dir.path(), true, false);
        let slot = Arc::new(Mutex::new(None));
        let states = Arc::new(Mutex::new(Vec::new()));
        client.add_listener(Box::new(DropOnClose {
            slot: slot.clone(),
            states: states.clone(),
        }));
        client.start().unwrap();
        *lock(&slot) = Some(client);

        if let Some(client) = lock(&slot).as_ref() {
            client.push_calling_state(CallingState::Idle);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while !lock(&states).contains(&SessionState::Ended) {
            assert!(Instant::now() < deadline, "teardown did not reach Ended");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(lock(&slot).is_none());
        assert_eq!(*lock(&ended), vec!["call-9"]);
        assert_eq!(
            *lock(&calls),
            vec!["create call-9 a ring=true", "camera", "microphone", "end"]
        );
    }
}
