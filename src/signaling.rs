//! Signaling wire surface.
//!
//! The server-facing event channel is owned by the surrounding client;
//! the engine only sends typed signals through [`SignalingTransport`]
//! and receives inbound ones via
//! [`CallSessionManager::handle_signal`]. Transport reconnection and
//! backoff are the transport's own business; the engine only watches
//! the coarse link state.
//!
//! [`CallSessionManager::handle_signal`]: crate::manager::CallSessionManager::handle_signal

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::types::ChatId;

/// SDP description exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// One ICE candidate, in the browser JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub chat_id: ChatId,
    pub offer: SessionDescription,
    pub caller_id: String,
    pub video_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub chat_id: ChatId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub chat_id: ChatId,
    pub candidate: IceCandidate,
}

/// Payload of the signals that only reference a call by its chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub chat_id: ChatId,
}

/// The bidirectional call signals, tagged with their wire event names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Signal {
    #[serde(rename = "call:offer")]
    Offer(OfferPayload),

    #[serde(rename = "call:answer")]
    Answer(AnswerPayload),

    #[serde(rename = "call:ice-candidate")]
    IceCandidate(IceCandidatePayload),

    /// Unconditional terminate, sent by either party at any time.
    #[serde(rename = "call:end")]
    End(CallRef),

    /// Decline/busy. Explicit decline and busy are deliberately not
    /// distinguished at the protocol level.
    #[serde(rename = "call:reject")]
    Reject(CallRef),
}

impl Signal {
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::Offer(p) => &p.chat_id,
            Self::Answer(p) => &p.chat_id,
            Self::IceCandidate(p) => &p.chat_id,
            Self::End(p) => &p.chat_id,
            Self::Reject(p) => &p.chat_id,
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Offer(_) => "call:offer",
            Self::Answer(_) => "call:answer",
            Self::IceCandidate(_) => "call:ice-candidate",
            Self::End(_) => "call:end",
            Self::Reject(_) => "call:reject",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SignalError {
    #[error("signaling channel closed")]
    ChannelClosed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Coarse connection state of the signaling channel, published by the
/// transport over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingLinkState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    /// The transport gave up connecting. Call setup aborts immediately
    /// instead of waiting out the connect bound.
    Failed,
}

/// Outbound half of the signaling channel.
///
/// The engine subscribes to the link state to gate call setup; it never
/// owns the connection lifecycle.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, signal: Signal) -> Result<(), SignalError>;

    fn link_state(&self) -> watch::Receiver<SignalingLinkState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_event_names() {
        let end = Signal::End(CallRef {
            chat_id: ChatId::from("c1"),
        });
        let value = serde_json::to_value(&end).unwrap();
        assert_eq!(value["event"], "call:end");
        assert_eq!(value["payload"]["chatId"], "c1");
    }

    #[test]
    fn test_offer_payload_shape() {
        let offer = Signal::Offer(OfferPayload {
            chat_id: ChatId::from("c1"),
            offer: SessionDescription::offer("v=0"),
            caller_id: "u2".to_string(),
            video_mode: true,
        });
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["event"], "call:offer");
        let payload = &value["payload"];
        assert_eq!(payload["chatId"], "c1");
        assert_eq!(payload["callerId"], "u2");
        assert_eq!(payload["videoMode"], true);
        assert_eq!(payload["offer"]["sdpType"], "offer");
    }

    #[test]
    fn test_signal_roundtrip() {
        let signal = Signal::IceCandidate(IceCandidatePayload {
            chat_id: ChatId::from("c9"),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        });
        let json = serde_json::to_string(&signal).unwrap();
        let parsed: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(signal, parsed);
        assert_eq!(parsed.event_name(), "call:ice-candidate");
    }

    #[test]
    fn test_chat_id_accessor() {
        let reject = Signal::Reject(CallRef {
            chat_id: ChatId::from("c3"),
        });
        assert_eq!(reject.chat_id().as_str(), "c3");
    }
}
