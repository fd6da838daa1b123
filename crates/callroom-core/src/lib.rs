//! Call-session lifecycle core for the chat room call screen.
//!
//! Pure Rust crate with no platform dependencies.
//! Consumed by native UI shells via UniFFI bindings.

pub mod backend;
pub mod call_room;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod initiator;
pub mod mock;
pub mod participants;
pub mod session;
pub mod settings;

pub use backend::{CallBackend, CallConnection, CallHandle, CallingState, MediaDevice};
pub use call_room::{CallRoom, CallView, SessionRequest};
pub use coordinator::{CoordinatorPhase, LifecycleCoordinator, TeardownTimeouts};
pub use errors::{BackendError, CallError};
pub use events::{CallEvent, CallEventListener, SessionEndedSink};
pub use initiator::{SessionInitiator, Started};
pub use participants::{LocalUser, Member, ParticipantChange, ParticipantSnapshot};
pub use session::{Role, Session, SessionId, SessionState};
pub use settings::{CallSettings, SettingsStore};
