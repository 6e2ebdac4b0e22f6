//! Platform adapter seam for the peer media connection.
//!
//! The web and mobile clients each bring their own peer-connection
//! implementation; both sit behind [`PeerLink`] so the controller and
//! the state machine stay platform-agnostic. A factory hands out one
//! link per call attempt together with the stream of events it
//! produces.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::MediaStream;
use crate::signaling::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("link closed")]
    Closed,
}

/// Connection state of the peer link, coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE negotiation state. The primary signal for network-quality
/// inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Events a peer link produces.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Remote media has started flowing. This is what moves a session
    /// to connected.
    RemoteStream(MediaStream),
    /// Transport-level state change, fed to the quality monitor.
    StateChanged {
        connection: LinkConnectionState,
        ice: IceState,
    },
    /// The platform layer observed the remote side hanging up.
    RemoteEnded,
    /// The platform layer observed the remote side as busy.
    RemoteBusy,
}

/// One underlying peer media connection.
///
/// Implementations must drop their `LinkEvent` sender when `close` is
/// called, so consumers of the event stream observe the end of it.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<(), LinkError>;

    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;

    async fn create_answer(
        &self,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, LinkError>;

    async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<(), LinkError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError>;

    async fn close(&self);
}

/// Creates fresh peer links, one per call attempt.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create_link(&self)
    -> Result<(Arc<dyn PeerLink>, mpsc::Receiver<LinkEvent>), LinkError>;
}
