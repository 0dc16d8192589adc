//! In-process backend implementing every collaborator contract.
//!
//! DESIGN
//! ======
//! All tables live in one `Mutex<MemoryState>`, so each call is an atomic
//! replace-on-write like the hosted store. Session and message feeds are
//! plain unbounded channels; closed receivers are pruned on the next emit.
//!
//! Faults can be switched on per operation to exercise the failure paths of
//! the gate and services without a network.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{AuthProvider, BlobStore, MessageStore, ProfileStore, StoreError, Subscription, UploadOptions};
use crate::types::{Chat, Message, NewMessage, Profile, ProfilePatch, Session, SignUp};

const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a random 32-byte hex token.
#[must_use]
pub(crate) fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

// =============================================================================
// FAULTS
// =============================================================================

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SessionFetch,
    ProfileLookup,
    ProfileInsert,
    ProfileUpdate,
    ChatList,
    MessageInsert,
    Upload,
}

// =============================================================================
// STATE
// =============================================================================

struct Account {
    user_id: Uuid,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    session_watchers: Vec<mpsc::UnboundedSender<Option<Session>>>,
    profiles: HashMap<Uuid, Profile>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    message_watchers: Vec<(Uuid, mpsc::UnboundedSender<Message>)>,
    blobs: HashMap<(String, String), Vec<u8>>,
    faults: HashMap<Fault, bool>,
    profile_lookups: usize,
}

impl MemoryState {
    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        if self.faults.get(&fault).copied().unwrap_or(false) {
            return Err(StoreError::Unavailable(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }

    fn set_session(&mut self, session: Option<Session>) {
        self.session.clone_from(&session);
        self.session_watchers
            .retain(|tx| tx.send(session.clone()).is_ok());
    }

    fn issue_session(&mut self, user_id: Uuid, email: &str) -> Session {
        let session = Session {
            user_id,
            email: email.to_owned(),
            authenticated: true,
            access_token: generate_token(),
            refresh_token: generate_token(),
            expires_at: Some(OffsetDateTime::now_utc().unix_timestamp() + ACCESS_TOKEN_TTL_SECS),
        };
        self.set_session(Some(session.clone()));
        session
    }
}

/// In-memory stand-in for the hosted backend.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Turn a fault on or off.
    pub fn set_fault(&self, fault: Fault, on: bool) {
        self.state().faults.insert(fault, on);
    }

    /// Create an account without signing in. Returns the new user id.
    pub fn register(&self, email: &str, password: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.state()
            .accounts
            .insert(email.to_owned(), Account { user_id, password: password.to_owned() });
        user_id
    }

    /// Store a profile row as-is, replacing any existing one.
    pub fn put_profile(&self, profile: Profile) {
        self.state().profiles.insert(profile.id, profile);
    }

    #[must_use]
    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.state().profiles.get(&id).cloned()
    }

    /// Create a chat between two users.
    pub fn create_chat(&self, user_a: Uuid, user_b: Uuid) -> Chat {
        let chat = Chat { id: Uuid::new_v4(), user_a, user_b, created_at: now_rfc3339() };
        self.state().chats.push(chat.clone());
        chat
    }

    #[must_use]
    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .blobs
            .get(&(bucket.to_owned(), path.to_owned()))
            .cloned()
    }

    /// Number of profile lookups served so far.
    #[must_use]
    pub fn profile_lookups(&self) -> usize {
        self.state().profile_lookups
    }

    /// Replace the current session and notify watchers, as the provider
    /// does on token refresh or expiry.
    pub fn emit_session(&self, session: Option<Session>) {
        self.state().set_session(session);
    }
}

// =============================================================================
// AUTH
// =============================================================================

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        let state = self.state();
        state.check(Fault::SessionFetch)?;
        Ok(state.session.clone())
    }

    fn watch_sessions(&self) -> Subscription<Option<Session>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().session_watchers.push(tx);
        Subscription::new(rx)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        self.state().set_session(None);
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let mut state = self.state();
        let user_id = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user_id,
            _ => {
                return Err(StoreError::Response { status: 400, body: "Invalid login credentials".into() });
            }
        };
        Ok(state.issue_session(user_id, email))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, StoreError> {
        let mut state = self.state();
        if state.accounts.contains_key(email) {
            return Err(StoreError::Response { status: 422, body: "User already registered".into() });
        }
        let user_id = Uuid::new_v4();
        state
            .accounts
            .insert(email.to_owned(), Account { user_id, password: password.to_owned() });
        let session = state.issue_session(user_id, email);
        Ok(SignUp { user_id, email: email.to_owned(), session: Some(session) })
    }

    async fn sign_in_with_oauth(&self, provider: &str) -> Result<String, StoreError> {
        Ok(format!("memory://oauth/authorize?provider={provider}"))
    }

    /// Accepts `memory://oauth/callback?email=<addr>`; unknown addresses are
    /// registered on the fly, like a first OAuth login.
    async fn complete_oauth(&self, callback_url: &str) -> Result<Session, StoreError> {
        let email = callback_url
            .split_once("email=")
            .map(|(_, rest)| rest.split('&').next().unwrap_or(rest))
            .filter(|e| !e.is_empty())
            .ok_or_else(|| StoreError::Parse("callback has no email".into()))?
            .to_owned();
        let mut state = self.state();
        let user_id = match state.accounts.get(&email) {
            Some(account) => account.user_id,
            None => {
                let user_id = Uuid::new_v4();
                state
                    .accounts
                    .insert(email.clone(), Account { user_id, password: generate_token() });
                user_id
            }
        };
        Ok(state.issue_session(user_id, &email))
    }
}

// =============================================================================
// PROFILES
// =============================================================================

#[async_trait]
impl ProfileStore for MemoryBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let mut state = self.state();
        state.profile_lookups += 1;
        state.check(Fault::ProfileLookup)?;
        Ok(state.profiles.get(&id).cloned())
    }

    async fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>, StoreError> {
        let state = self.state();
        state.check(Fault::ProfileLookup)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(Fault::ProfileInsert)?;
        if state.profiles.contains_key(&profile.id) {
            return Err(StoreError::Response { status: 409, body: "duplicate key value violates unique constraint".into() });
        }
        state.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(Fault::ProfileUpdate)?;
        // An update matching no rows succeeds with nothing changed.
        if let Some(profile) = state.profiles.get_mut(&id) {
            patch.apply_to(profile);
        }
        Ok(())
    }
}

// =============================================================================
// CHATS & MESSAGES
// =============================================================================

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>, StoreError> {
        let state = self.state();
        state.check(Fault::ChatList)?;
        Ok(state
            .chats
            .iter()
            .rev()
            .filter(|c| c.user_a == user_id || c.user_b == user_id)
            .cloned()
            .collect())
    }

    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let state = self.state();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(Fault::MessageInsert)?;
        let row = Message {
            id: Uuid::new_v4(),
            chat_id: message.chat_id,
            sender: message.sender.clone(),
            content: message.content.clone(),
            image_url: message.image_url.clone(),
            created_at: now_rfc3339(),
        };
        state.messages.push(row.clone());
        state
            .message_watchers
            .retain(|(chat_id, tx)| *chat_id != row.chat_id || tx.send(row.clone()).is_ok());
        Ok(())
    }

    async fn subscribe_new_messages(&self, chat_id: Uuid) -> Result<Subscription<Message>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().message_watchers.push((chat_id, tx));
        Ok(Subscription::new(rx))
    }
}

// =============================================================================
// BLOBS
// =============================================================================

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(Fault::Upload)?;
        let key = (bucket.to_owned(), path.to_owned());
        if !options.upsert && state.blobs.contains_key(&key) {
            return Err(StoreError::Response { status: 409, body: "The resource already exists".into() });
        }
        state.blobs.insert(key, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
