//! Seam to the vendor video-calling SDK.
//!
//! The core never talks to the SDK directly. A native shell (or the mock in
//! [`crate::mock`]) implements [`CallBackend`] and hands back the call's two
//! notification streams when a call is created or joined.

use std::fmt;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::errors::BackendError;
use crate::participants::{Member, ParticipantChange};
use crate::session::SessionId;

/// Calling state as reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingState {
    Idle,
    Connecting,
    Joined,
    Reconnecting,
}

impl CallingState {
    pub fn is_idle(self) -> bool {
        self == CallingState::Idle
    }
}

/// Local capture devices released during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDevice {
    Camera,
    Microphone,
}

impl fmt::Display for MediaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDevice::Camera => f.write_str("camera"),
            MediaDevice::Microphone => f.write_str("microphone"),
        }
    }
}

/// Opaque reference to a call owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    pub call_id: String,
}

impl CallHandle {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
        }
    }
}

pub type CallStateStream = BoxStream<'static, CallingState>;
pub type ParticipantStream = BoxStream<'static, ParticipantChange>;

/// A live call: its handle plus the change notifications the SDK delivers
/// for it. Each stream can be consumed once.
pub struct CallConnection {
    pub handle: CallHandle,
    pub call_states: CallStateStream,
    pub participants: ParticipantStream,
}

impl fmt::Debug for CallConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConnection")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Operations the lifecycle core needs from the calling SDK.
#[async_trait]
pub trait CallBackend: Send + Sync {
    /// Create a call with `session_id` and invite `members`.
    async fn create_call(
        &self,
        session_id: &SessionId,
        members: &[Member],
        ring: bool,
    ) -> Result<CallConnection, BackendError>;

    /// Join the existing call identified by `session_id`.
    async fn join_call(&self, session_id: &SessionId) -> Result<CallConnection, BackendError>;

    async fn disable_camera(&self, handle: &CallHandle) -> Result<(), BackendError>;

    async fn disable_microphone(&self, handle: &CallHandle) -> Result<(), BackendError>;

    async fn end_call(&self, handle: &CallHandle) -> Result<(), BackendError>;
}

/// Adapt a channel receiver into a notification stream.
pub fn channel_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}
