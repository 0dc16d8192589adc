//! `/rest/v1` row access for `profiles`, `chats`, and `messages`.

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use super::realtime;
use super::{SupabaseClient, check};
use crate::backend::{MessageStore, ProfileStore, StoreError, Subscription};
use crate::types::{Chat, Message, NewMessage, Profile, ProfilePatch};

const PROFILES: &str = "/rest/v1/profiles";
const CHATS: &str = "/rest/v1/chats";
const MESSAGES: &str = "/rest/v1/messages";

// =============================================================================
// FILTERS
// =============================================================================

pub(super) fn eq(id: Uuid) -> String {
    format!("eq.{id}")
}

pub(super) fn in_list(ids: &[Uuid]) -> String {
    let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
    format!("in.({joined})")
}

/// Rows where the user is either participant.
pub(super) fn either_participant(user_id: Uuid) -> String {
    format!("(user_a.eq.{user_id},user_b.eq.{user_id})")
}

// =============================================================================
// CLIENT
// =============================================================================

impl SupabaseClient {
    async fn select<T>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let resp = self
            .request(Method::GET, table)
            .query(&[("select", "*")])
            .query(query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn write<B>(&self, method: Method, table: &str, query: &[(&str, String)], body: &B) -> Result<(), StoreError>
    where
        B: serde::Serialize + ?Sized,
    {
        let resp = self
            .request(method, table)
            .query(query)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let rows: Vec<Profile> = self.select(PROFILES, &[("id", eq(id)), ("limit", "1".into())]).await?;
        Ok(rows.into_iter().next())
    }

    async fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(PROFILES, &[("id", in_list(ids))]).await
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.write(Method::POST, PROFILES, &[], profile).await?;
        debug!(user_id = %profile.id, "profile inserted");
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<(), StoreError> {
        self.write(Method::PATCH, PROFILES, &[("id", eq(id))], patch).await
    }
}

#[async_trait]
impl MessageStore for SupabaseClient {
    async fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>, StoreError> {
        self.select(
            CHATS,
            &[("or", either_participant(user_id)), ("order", "created_at.desc".into())],
        )
        .await
    }

    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.select(MESSAGES, &[("chat_id", eq(chat_id)), ("order", "created_at.asc".into())])
            .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<(), StoreError> {
        self.write(Method::POST, MESSAGES, &[], message).await
    }

    async fn subscribe_new_messages(&self, chat_id: Uuid) -> Result<Subscription<Message>, StoreError> {
        let url = realtime::websocket_url(&self.config.url, &self.config.anon_key)?;
        realtime::subscribe(url, chat_id, self.bearer()).await
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
