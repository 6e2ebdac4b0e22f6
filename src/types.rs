//! Core identifiers and enums shared across the call engine.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one call attempt. Never reused across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh call id (32 uppercase hex characters).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the chat a call is signalled through. Remote
/// `call:end` / `call:reject` events are matched against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallMediaType {
    Audio,
    Video,
}

/// Coarse, UI-facing classification of current call connectivity health.
///
/// `Poor` and `Lost` are reserved for finer-grained signal-quality
/// heuristics; the connection-state mapping only produces `Good` and
/// `Reconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum NetworkState {
    #[default]
    Good,
    Poor,
    Reconnecting,
    Lost,
}

/// Presence hint attached to a contact, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum PresenceHint {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// Counterpart identity shown on the call screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub presence: PresenceHint,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, presence: PresenceHint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            presence,
        }
    }

    /// Fallback identity used when a directory lookup fails. Lookup
    /// failures degrade to this placeholder, never abort call setup.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "Unknown".to_string(),
            presence: PresenceHint::Unknown,
        }
    }
}

/// Display metadata for a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatInfo {
    pub id: ChatId,
    pub name: String,
}
