//! Supabase-compatible HTTP/websocket adapter.
//!
//! DESIGN
//! ======
//! One [`SupabaseClient`] implements every collaborator contract against a
//! hosted project: `/auth/v1` (GoTrue), `/rest/v1` (PostgREST),
//! `/storage/v1`, and `/realtime/v1` (Phoenix channels). It holds the
//! current session so row and storage requests carry the user's bearer
//! token; before sign-in they fall back to the anon key.
//!
//! LIFECYCLE
//! =========
//! Built with [`SupabaseClient::connect`], optionally followed by
//! [`SupabaseClient::spawn_token_refresh`]. [`SupabaseClient::shutdown`]
//! stops the refresh task and closes session feeds; it does not sign out.

mod auth;
mod realtime;
mod rest;
mod storage;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::StoreError;
use crate::config::SupabaseConfig;
use crate::types::Session;

pub struct SupabaseClient {
    http: reqwest::Client,
    config: SupabaseConfig,
    oauth_redirect: Option<String>,
    session: RwLock<Option<Session>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Option<Session>>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SupabaseClient {
    /// Build the HTTP client. No request is made until first use.
    pub fn connect(config: SupabaseConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| StoreError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            config,
            oauth_redirect: None,
            session: RwLock::new(None),
            watchers: Mutex::new(Vec::new()),
            refresh_task: Mutex::new(None),
        })
    }

    /// Where the OAuth provider should send the user back.
    #[must_use]
    pub fn with_oauth_redirect(mut self, redirect: Option<String>) -> Self {
        self.oauth_redirect = redirect;
        self
    }

    /// Start refreshing the access token shortly before it expires.
    /// Replaces any refresh task already running.
    pub fn spawn_token_refresh(self: &Arc<Self>) {
        let task = auth::spawn_refresh_loop(Arc::downgrade(self));
        if let Some(previous) = lock(&self.refresh_task).replace(task) {
            previous.abort();
        }
    }

    /// Stop background work and close every session feed.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.refresh_task).take() {
            task.abort();
        }
        lock(&self.watchers).clear();
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url)
    }

    fn stored_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the held session and notify watchers.
    fn set_session(&self, session: Option<Session>) {
        (*self.session.write().unwrap_or_else(PoisonError::into_inner)).clone_from(&session);
        lock(&self.watchers).retain(|tx| tx.send(session.clone()).is_ok());
    }

    fn bearer(&self) -> String {
        self.stored_session()
            .map(|s| s.access_token)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    /// Request with `apikey` and the current bearer token attached.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with_token(method, path, &self.bearer())
    }

    fn request_with_token(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn a non-success response into [`StoreError::Response`].
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Response { status: status.as_u16(), body })
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
