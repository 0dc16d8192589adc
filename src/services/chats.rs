//! Chat list screen.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::ServiceError;
use crate::backend::{Backend, MessageStore, ProfileStore};
use crate::types::{Chat, Profile};

pub const UNKNOWN_USER: &str = "Unknown User";
pub const PLACEHOLDER_AVATAR: &str = "https://placehold.co/40";

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat: Chat,
    pub counterpart_id: Uuid,
    pub counterpart: Option<Profile>,
}

impl ChatSummary {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.counterpart
            .as_ref()
            .and_then(|p| p.username.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_USER)
    }

    #[must_use]
    pub fn avatar_url(&self) -> &str {
        self.counterpart
            .as_ref()
            .and_then(|p| p.avatar_url.as_deref())
            .filter(|url| !url.is_empty())
            .unwrap_or(PLACEHOLDER_AVATAR)
    }
}

pub struct ChatListService {
    messages: Arc<dyn MessageStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl ChatListService {
    #[must_use]
    pub fn new(backend: &Backend) -> Self {
        Self { messages: backend.messages.clone(), profiles: backend.profiles.clone() }
    }

    /// Chats of `user_id`, newest first, each with the other participant's
    /// profile when it could be fetched.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, ServiceError> {
        let chats = self.messages.list_chats_for_user(user_id).await?;

        let mut seen = HashSet::new();
        let counterpart_ids: Vec<Uuid> = chats
            .iter()
            .map(|chat| chat.counterpart(user_id))
            .filter(|id| seen.insert(*id))
            .collect();

        let mut by_id: HashMap<Uuid, Profile> = HashMap::new();
        if !counterpart_ids.is_empty() {
            match self.profiles.get_profiles(&counterpart_ids).await {
                Ok(profiles) => by_id.extend(profiles.into_iter().map(|p| (p.id, p))),
                Err(e) => warn!(error = %e, %user_id, "counterpart profile fetch failed"),
            }
        }

        Ok(chats
            .into_iter()
            .map(|chat| {
                let counterpart_id = chat.counterpart(user_id);
                let counterpart = by_id.get(&counterpart_id).cloned();
                ChatSummary { chat, counterpart_id, counterpart }
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "chats_test.rs"]
mod tests;
