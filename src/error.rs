//! Call-related error types.
//!
//! Every variant has a distinct, user-presentable message; failures are
//! surfaced to the UI exactly once, as a [`CallEvent::CallFailed`]
//! notification, never as a generic "call failed".
//!
//! [`CallEvent::CallFailed`]: crate::events::CallEvent::CallFailed

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("another call is already in progress")]
    CallInProgress,

    #[error("no chat is associated with this call")]
    MissingContext,

    #[error("the signaling channel is unavailable")]
    TransportUnavailable,

    #[error("timed out waiting for the signaling channel")]
    ConnectTimeout,

    #[error("could not access the microphone or camera: {0}")]
    MediaAcquisitionFailure(String),

    #[error("no answer")]
    RemoteNoAnswer,

    #[error("the other side is busy")]
    RemoteBusy,

    #[error("call declined")]
    RemoteRejected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("inconsistent call state: {0}")]
    InconsistentState(String),
}
