//! `/auth/v1` calls and session upkeep.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SupabaseClient, check, lock};
use crate::backend::{AuthProvider, StoreError, Subscription};
use crate::types::{Session, SignUp};

/// Refresh this long before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Poll interval while no expiring session is held, and retry delay after a
/// failed refresh.
const REFRESH_IDLE_SECS: u64 = 30;

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct WireUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: WireUser,
}

impl TokenResponse {
    pub(super) fn into_session(self, now: i64) -> Session {
        let expires_at = self.expires_at.or(self.expires_in.map(|secs| now + secs));
        Session {
            user_id: self.user.id,
            email: self.user.email.unwrap_or_default(),
            authenticated: true,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Sign-up answers with a full token response when email confirmation is
/// off, and with the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum SignUpResponse {
    Session(TokenResponse),
    User(WireUser),
}

impl SignUpResponse {
    pub(super) fn into_sign_up(self, now: i64) -> SignUp {
        match self {
            Self::Session(token) => {
                let session = token.into_session(now);
                SignUp { user_id: session.user_id, email: session.email.clone(), session: Some(session) }
            }
            Self::User(user) => SignUp { user_id: user.id, email: user.email.unwrap_or_default(), session: None },
        }
    }
}

/// Tokens carried back on the OAuth redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
}

// =============================================================================
// HELPERS
// =============================================================================

pub(super) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Provider authorize URL the user opens in a browser.
pub(super) fn authorize_url(base: &str, provider: &str, redirect: Option<&str>) -> Result<Url, StoreError> {
    let endpoint = format!("{base}/auth/v1/authorize");
    let mut params = vec![("provider", provider)];
    if let Some(redirect) = redirect {
        params.push(("redirect_to", redirect));
    }
    Url::parse_with_params(&endpoint, &params).map_err(|e| StoreError::Parse(format!("authorize url: {e}")))
}

/// Extract tokens from the URL the provider redirected to.
///
/// Tokens normally arrive in the fragment; errors may arrive in either the
/// fragment or the query string.
pub(super) fn parse_callback(callback: &str, now: i64) -> Result<CallbackTokens, StoreError> {
    let url = Url::parse(callback.trim()).map_err(|e| StoreError::Parse(format!("callback url: {e}")))?;
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        let carrier = Url::parse(&format!("http://callback/?{fragment}"))
            .map_err(|e| StoreError::Parse(format!("callback fragment: {e}")))?;
        params.extend(carrier.query_pairs().into_owned());
    }

    if let Some(error) = params.get("error") {
        let body = params.get("error_description").unwrap_or(error).clone();
        return Err(StoreError::Response { status: 400, body });
    }
    if params.contains_key("code") {
        return Err(StoreError::Unsupported("oauth code exchange"));
    }
    let access_token = params
        .remove("access_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StoreError::Parse("callback carries no access_token".into()))?;
    let refresh_token = params.remove("refresh_token").unwrap_or_default();
    let expires_at = params
        .get("expires_at")
        .and_then(|v| v.parse().ok())
        .or_else(|| params.get("expires_in").and_then(|v| v.parse::<i64>().ok()).map(|secs| now + secs));
    Ok(CallbackTokens { access_token, refresh_token, expires_at })
}

/// How long to wait before refreshing a token that expires at `expires_at`.
pub(super) fn refresh_delay(expires_at: i64, now: i64) -> Duration {
    let secs = (expires_at - now - REFRESH_MARGIN_SECS).max(0);
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

// =============================================================================
// CLIENT
// =============================================================================

impl SupabaseClient {
    async fn token_grant(&self, grant: &str, body: serde_json::Value) -> Result<Session, StoreError> {
        let resp = self
            .request_with_token(Method::POST, &format!("/auth/v1/token?grant_type={grant}"), &self.config.anon_key)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(resp).await?.json().await?;
        Ok(token.into_session(unix_now()))
    }

    /// Exchange the refresh token for a fresh session and publish it.
    pub async fn refresh_session(&self) -> Result<Session, StoreError> {
        let current = self.stored_session().ok_or(StoreError::NoSession)?;
        if current.refresh_token.is_empty() {
            return Err(StoreError::NoSession);
        }
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": current.refresh_token }))
            .await?;
        debug!(user_id = %session.user_id, "access token refreshed");
        self.set_session(Some(session.clone()));
        Ok(session)
    }
}

pub(super) fn spawn_refresh_loop(client: Weak<SupabaseClient>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = {
                let Some(client) = client.upgrade() else { break };
                match client.stored_session().and_then(|s| s.expires_at) {
                    Some(expires_at) => refresh_delay(expires_at, unix_now()),
                    None => {
                        drop(client);
                        tokio::time::sleep(Duration::from_secs(REFRESH_IDLE_SECS)).await;
                        continue;
                    }
                }
            };
            tokio::time::sleep(delay).await;

            let Some(client) = client.upgrade() else { break };
            let due = client
                .stored_session()
                .and_then(|s| s.expires_at)
                .is_some_and(|expires_at| refresh_delay(expires_at, unix_now()).is_zero());
            if !due {
                continue;
            }
            if let Err(e) = client.refresh_session().await {
                warn!(error = %e, "token refresh failed");
                if matches!(&e, StoreError::Response { status: 400 | 401, .. }) {
                    client.set_session(None);
                }
                drop(client);
                tokio::time::sleep(Duration::from_secs(REFRESH_IDLE_SECS)).await;
            }
        }
    })
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.stored_session())
    }

    fn watch_sessions(&self) -> Subscription<Option<Session>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.watchers).push(tx);
        Subscription::new(rx)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        let result = match self.stored_session() {
            Some(session) if !session.access_token.is_empty() => {
                let sent = self
                    .request_with_token(Method::POST, "/auth/v1/logout", &session.access_token)
                    .send()
                    .await;
                match sent {
                    Ok(resp) => check(resp).await.map(drop),
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(()),
        };
        if let Err(e) = &result {
            warn!(error = %e, "remote sign-out failed; clearing local session");
        }
        self.set_session(None);
        info!("signed out");
        result
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        info!(user_id = %session.user_id, "password sign-in");
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, StoreError> {
        let resp = self
            .request_with_token(Method::POST, "/auth/v1/signup", &self.config.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: SignUpResponse = check(resp).await?.json().await?;
        let sign_up = body.into_sign_up(unix_now());
        info!(user_id = %sign_up.user_id, confirmed = sign_up.session.is_some(), "sign-up");
        if let Some(session) = &sign_up.session {
            self.set_session(Some(session.clone()));
        }
        Ok(sign_up)
    }

    async fn sign_in_with_oauth(&self, provider: &str) -> Result<String, StoreError> {
        let url = authorize_url(&self.config.url, provider, self.oauth_redirect.as_deref())?;
        Ok(url.into())
    }

    async fn complete_oauth(&self, callback_url: &str) -> Result<Session, StoreError> {
        let tokens = parse_callback(callback_url, unix_now())?;
        let resp = self
            .request_with_token(Method::GET, "/auth/v1/user", &tokens.access_token)
            .send()
            .await?;
        let user: WireUser = check(resp).await?.json().await?;
        let session = Session {
            user_id: user.id,
            email: user.email.unwrap_or_default(),
            authenticated: true,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
        };
        info!(user_id = %session.user_id, "oauth sign-in");
        self.set_session(Some(session.clone()));
        Ok(session)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
