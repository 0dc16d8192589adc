//! Collaborator contracts for the hosted backend.
//!
//! DESIGN
//! ======
//! Auth, profile rows, chat rows, and blob storage are each a narrow trait.
//! A [`Backend`] bundles one implementation of each and is constructed
//! explicitly and passed to the gate and every service; nothing holds a
//! process-wide client.
//!
//! Push-style feeds (session changes, new messages) are delivered through a
//! [`Subscription`]. Dropping it unsubscribes.

pub mod memory;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::types::{Chat, Message, NewMessage, Profile, ProfilePatch, Session, SignUp};

// =============================================================================
// ERROR
// =============================================================================

/// Failures reported by any backend collaborator.
///
/// A missing row is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request never produced a response (network, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {body}")]
    Response { status: u16, body: String },

    /// A response body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The call needs an authenticated session and there is none.
    #[error("no active session")]
    NoSession,

    /// The backend does not support this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The backend is reachable but refused the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl StoreError {
    /// Whether repeating the same call could plausibly succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Unavailable(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() { Self::Parse(e.to_string()) } else { Self::Request(e.to_string()) }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Receiving end of a push feed.
///
/// Adapters that need a background task (e.g. a websocket reader) attach it
/// here so it is aborted when the subscriber goes away.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, task: None }
    }

    #[must_use]
    pub fn with_task(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// Wait for the next item. `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an item if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// CONTRACTS
// =============================================================================

/// Session issuance and change notification.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The session currently held by the provider, if any.
    async fn current_session(&self) -> Result<Option<Session>, StoreError>;

    /// Feed of session changes (login, logout, token refresh).
    fn watch_sessions(&self) -> Subscription<Option<Session>>;

    async fn sign_out(&self) -> Result<(), StoreError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, StoreError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, StoreError>;

    /// Start an OAuth login, returning the URL the user must visit.
    async fn sign_in_with_oauth(&self, provider: &str) -> Result<String, StoreError>;

    /// Finish an OAuth login from the redirect URL the provider sent back.
    async fn complete_oauth(&self, _callback_url: &str) -> Result<Session, StoreError> {
        Err(StoreError::Unsupported("oauth callback"))
    }
}

/// CRUD on the `profiles` table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Fetch every profile whose id is in `ids`. Missing ids are skipped.
    async fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>, StoreError>;

    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<(), StoreError>;
}

/// Chat and message rows plus the insert feed.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Chats the user takes part in, newest first.
    async fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>, StoreError>;

    /// Messages of one chat, oldest first.
    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<(), StoreError>;

    /// Push feed of rows inserted into `chat_id` from now on.
    async fn subscribe_new_messages(&self, chat_id: Uuid) -> Result<Subscription<Message>, StoreError>;
}

/// Options for a blob upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Replace an existing object at the same path.
    pub upsert: bool,
}

/// Object storage for images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), StoreError>;

    /// Public URL for an object. Does not check that it exists.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

// =============================================================================
// BACKEND BUNDLE
// =============================================================================

/// One implementation of each collaborator, injected into the gate and
/// services. Clone is cheap; all fields are `Arc`s.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    pub messages: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backend {
    /// Build a bundle where one client implements every contract.
    #[must_use]
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: AuthProvider + ProfileStore + MessageStore + BlobStore + 'static,
    {
        Self { auth: client.clone(), profiles: client.clone(), messages: client.clone(), blobs: client }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
