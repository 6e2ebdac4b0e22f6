//! Contact and chat lookup collaborator.
//!
//! The call engine only reads display metadata from here; the actual
//! contact/chat store lives in the surrounding client. Lookup misses
//! degrade to [`Contact::placeholder`] and never abort call setup.

use crate::types::{ChatId, ChatInfo, Contact};
use async_trait::async_trait;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn contact_by_id(&self, contact_id: &str) -> Option<Contact>;

    async fn chat_by_id(&self, chat_id: &ChatId) -> Option<ChatInfo>;
}

/// Directory that knows nothing. Every lookup misses, so sessions fall
/// back to placeholder display names.
#[derive(Debug, Default)]
pub struct EmptyDirectory;

#[async_trait]
impl Directory for EmptyDirectory {
    async fn contact_by_id(&self, _contact_id: &str) -> Option<Contact> {
        None
    }

    async fn chat_by_id(&self, _chat_id: &ChatId) -> Option<ChatInfo> {
        None
    }
}
