//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::signaling::SessionDescription;
use crate::types::{CallDirection, CallId, CallMediaType, ChatId, Contact, NetworkState};

/// Current state of the active call. The absence of a session is the
/// implicit idle/terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallSessionState {
    /// Outgoing call: setting up, waiting for the remote side.
    Calling,
    /// Incoming call: ringing locally.
    Ringing,
    /// Media flowing both ways.
    Connected,
    /// Transient connectivity loss, trying to recover.
    Reconnecting,
}

/// State transitions driven by the manager.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// The controller reported the remote stream; the call is live.
    MediaConnected,
    /// The quality monitor reported degraded connectivity.
    LinkDegraded,
    /// Connectivity recovered without the session being destroyed.
    LinkRecovered,
}

/// Transient record of an inbound offer that has not been accepted or
/// declined yet. Exists iff an incoming session is ringing unanswered.
#[derive(Debug, Clone)]
pub struct PendingOffer {
    pub chat_id: ChatId,
    pub remote_offer: SessionDescription,
    pub video_requested: bool,
}

/// The single mutable record of a call in progress.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub id: CallId,
    /// Chat the call is signalled through. Absent only on the
    /// fail-fast path of a start request without a chat.
    pub chat_id: Option<ChatId>,
    pub direction: CallDirection,
    pub media: CallMediaType,
    pub contact: Contact,
    pub state: CallSessionState,
    pub network_state: NetworkState,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the first transition into `Connected`.
    /// Monotonic, so elapsed time never resets across reconnects.
    #[serde(skip)]
    pub started_at: Option<Instant>,
    pub muted: bool,
    pub speaker_on: bool,
    pub camera_off: bool,
    pub front_camera: bool,
}

impl CallSession {
    pub fn new_outgoing(
        id: CallId,
        chat_id: Option<ChatId>,
        contact: Contact,
        media: CallMediaType,
    ) -> Self {
        Self::new(id, chat_id, contact, media, CallDirection::Outgoing)
    }

    pub fn new_incoming(id: CallId, chat_id: ChatId, contact: Contact, media: CallMediaType) -> Self {
        Self::new(id, Some(chat_id), contact, media, CallDirection::Incoming)
    }

    fn new(
        id: CallId,
        chat_id: Option<ChatId>,
        contact: Contact,
        media: CallMediaType,
        direction: CallDirection,
    ) -> Self {
        Self {
            id,
            chat_id,
            direction,
            media,
            contact,
            state: match direction {
                CallDirection::Outgoing => CallSessionState::Calling,
                CallDirection::Incoming => CallSessionState::Ringing,
            },
            network_state: NetworkState::Good,
            created_at: Utc::now(),
            started_at: None,
            muted: false,
            speaker_on: media == CallMediaType::Video,
            camera_off: media == CallMediaType::Audio,
            front_camera: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == CallSessionState::Connected
    }

    pub fn is_ringing(&self) -> bool {
        self.state == CallSessionState::Ringing
    }

    /// Whether the call ever reached connected, regardless of the
    /// current state.
    pub fn reached_connected(&self) -> bool {
        self.started_at.is_some()
    }

    /// Elapsed time since the first transition into connected.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|s| s.elapsed())
    }

    /// Apply a state transition. Returns an error if the transition is
    /// invalid for the current state.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_state = match (self.state, transition) {
            (CallSessionState::Calling | CallSessionState::Ringing, CallTransition::MediaConnected) => {
                if self.started_at.is_none() {
                    self.started_at = Some(Instant::now());
                }
                CallSessionState::Connected
            }
            (CallSessionState::Connected, CallTransition::LinkDegraded) => {
                CallSessionState::Reconnecting
            }
            (CallSessionState::Reconnecting, CallTransition::LinkRecovered) => {
                CallSessionState::Connected
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outgoing_session() -> CallSession {
        CallSession::new_outgoing(
            CallId::generate(),
            Some(ChatId::from("c1")),
            Contact::placeholder("u2"),
            CallMediaType::Audio,
        )
    }

    fn make_incoming_session() -> CallSession {
        CallSession::new_incoming(
            CallId::generate(),
            ChatId::from("c1"),
            Contact::placeholder("u2"),
            CallMediaType::Video,
        )
    }

    /// Flow: Calling → Connected.
    #[test]
    fn test_outgoing_session_flow() {
        let mut session = make_outgoing_session();
        assert_eq!(session.state, CallSessionState::Calling);
        assert!(session.started_at.is_none());

        session.apply_transition(CallTransition::MediaConnected).unwrap();
        assert!(session.is_connected());
        assert!(session.started_at.is_some());
    }

    /// Flow: Ringing → Connected.
    #[test]
    fn test_incoming_session_flow() {
        let mut session = make_incoming_session();
        assert!(session.is_ringing());

        session.apply_transition(CallTransition::MediaConnected).unwrap();
        assert!(session.is_connected());
    }

    /// Reconnection must preserve the original start instant.
    #[test]
    fn test_reconnect_preserves_started_at() {
        let mut session = make_outgoing_session();
        session.apply_transition(CallTransition::MediaConnected).unwrap();
        let started = session.started_at.unwrap();

        session.apply_transition(CallTransition::LinkDegraded).unwrap();
        assert_eq!(session.state, CallSessionState::Reconnecting);
        assert!(session.reached_connected());

        session.apply_transition(CallTransition::LinkRecovered).unwrap();
        assert!(session.is_connected());
        assert_eq!(session.started_at.unwrap(), started);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = make_outgoing_session();

        // Can't degrade or recover before connecting.
        assert!(session.apply_transition(CallTransition::LinkDegraded).is_err());
        assert!(session.apply_transition(CallTransition::LinkRecovered).is_err());

        session.apply_transition(CallTransition::MediaConnected).unwrap();

        // Connected at most once.
        assert!(session.apply_transition(CallTransition::MediaConnected).is_err());

        // Recover only applies from reconnecting.
        assert!(session.apply_transition(CallTransition::LinkRecovered).is_err());
    }

    #[test]
    fn test_media_defaults() {
        let audio = make_outgoing_session();
        assert!(audio.camera_off);
        assert!(!audio.speaker_on);
        assert!(!audio.muted);
        assert!(audio.front_camera);

        let video = make_incoming_session();
        assert!(!video.camera_off);
        assert!(video.speaker_on);
    }

    #[test]
    fn test_direction_is_fixed_at_creation() {
        assert_eq!(make_outgoing_session().direction, CallDirection::Outgoing);
        assert_eq!(make_incoming_session().direction, CallDirection::Incoming);
    }
}
