//! Records shared by the gate, services, and backend adapters.
//!
//! Field names follow the hosted tables (`profiles`, `chats`, `messages`)
//! so the same structs serialize straight onto the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// SESSION
// =============================================================================

/// Authenticated identity issued by the auth provider.
///
/// Replaced wholesale on every auth change notification. The gate only reads
/// `user_id` and `email`; tokens belong to the adapter that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub authenticated: bool,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix seconds at which the access token expires, when known.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Session {
    #[must_use]
    pub fn new(user_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            authenticated: true,
            access_token: String::new(),
            refresh_token: String::new(),
            expires_at: None,
        }
    }
}

/// Result of a sign-up call. `session` is absent when the provider requires
/// email confirmation before issuing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub user_id: Uuid,
    pub email: String,
    pub session: Option<Session>,
}

// =============================================================================
// PROFILE
// =============================================================================

/// Application-level user record, keyed by the auth user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    /// A profile is complete once both username and avatar are set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        non_blank(self.username.as_deref()) && non_blank(self.avatar_url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    /// Apply this patch to a stored profile.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(username) = &self.username {
            profile.username = Some(username.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
    }
}

// =============================================================================
// CHATS & MESSAGES
// =============================================================================

/// A private chat between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Chat {
    /// The participant that is not `me`.
    #[must_use]
    pub fn counterpart(&self, me: Uuid) -> Uuid {
        if self.user_a == me { self.user_b } else { self.user_a }
    }
}

/// A stored chat message. Either `content` or `image_url` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// Sender email address.
    pub sender: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Insert record for a message; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn text(chat_id: Uuid, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self { chat_id, sender: sender.into(), content: Some(content.into()), image_url: None }
    }

    #[must_use]
    pub fn image(chat_id: Uuid, sender: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self { chat_id, sender: sender.into(), content: None, image_url: Some(image_url.into()) }
    }
}

// =============================================================================
// FILES
// =============================================================================

/// A local file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
