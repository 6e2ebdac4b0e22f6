//! Call sessions for a messenger client.
//!
//! The crate is organized around three collaborators:
//!
//! - [`manager::CallSessionManager`] owns the single active session,
//!   arbitrates concurrency and exposes the control API plus a
//!   broadcast event stream for observers.
//! - [`peer::PeerConnectionController`] runs the offer/answer
//!   handshake for one call attempt over an abstract [`link::PeerLink`]
//!   and owns the acquired media for that attempt.
//! - [`quality::NetworkQualityMonitor`] folds raw link state changes
//!   into a coarse [`types::NetworkState`] for display.
//!
//! Signaling I/O and device capture stay behind the
//! [`signaling::SignalingTransport`] and [`media::MediaCapture`] traits
//! so the embedding client supplies platform-specific adapters.

pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod media;
pub mod peer;
pub mod quality;
pub mod session;
pub mod signaling;
pub mod types;

pub use config::CallConfig;
pub use error::CallError;
pub use events::CallEvent;
pub use manager::CallSessionManager;
pub use session::{CallSession, CallSessionState};
pub use signaling::{Signal, SignalingLinkState, SignalingTransport};
pub use types::{CallDirection, CallId, CallMediaType, ChatId, NetworkState};
