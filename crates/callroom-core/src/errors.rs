use thiserror::Error;

use crate::backend::MediaDevice;

/// Errors surfaced to the presentation layer.
///
/// None of these are fatal to the process. A session keeps at most one of
/// them in its error slot (see [`crate::session::Session::record_error`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("call creation failed: {0}")]
    CreationFailed(String),
    #[error("joining call failed: {0}")]
    JoinFailed(String),
    #[error("disabling {device} failed: {reason}")]
    DeviceDisableFailed { device: MediaDevice, reason: String },
    #[error("ending call failed: {0}")]
    EndCallFailed(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by a [`crate::backend::CallBackend`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
