//! UI-facing observer events.
//!
//! The UI layers are pure subscribers: they render whatever the session
//! snapshot says and never mutate call state directly. Everything the
//! call overlay needs rides one typed broadcast channel.

use crate::error::CallError;
use crate::media::MediaStream;
use crate::session::CallSession;

// The size of the broadcast channel buffer.
pub(crate) const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The active session changed, or was destroyed (`None`). Carries
    /// a snapshot, not a live handle.
    SessionChanged(Option<CallSession>),
    /// One-per-second elapsed duration while connected, in seconds.
    DurationTick(u64),
    /// Local device stream is live (preview, self-view).
    LocalStream(MediaStream),
    /// Remote media arrived.
    RemoteStream(MediaStream),
    /// A terminal failure. Exactly one per failed call attempt, with a
    /// distinct message per failure kind.
    CallFailed(CallError),
    /// The remote side terminated before the call connected.
    CallCancelled,
}
