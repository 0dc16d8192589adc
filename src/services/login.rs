//! Login screen: password sign-in, sign-up, and OAuth behind capability
//! flags.
//!
//! Sign-up also bootstraps the profile row. That write is best effort: if
//! it fails the account still exists and the gate will create the profile
//! on the first post-auth check.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ServiceError, ValidationError};
use crate::backend::{AuthProvider, Backend, ProfileStore, StoreError};
use crate::config::{AppConfig, AuthMethods};
use crate::gate::resolve::bootstrap_profile;
use crate::types::Session;

const PROFILE_BOOTSTRAP_FAILED: &str = "Signup succeeded, but profile creation failed.";

/// Trim and lowercase an email, rejecting anything without exactly one `@`
/// separating non-empty parts.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

fn validate_credentials(email: &str, password: &str) -> Result<String, ValidationError> {
    let email = normalize_email(email).ok_or(ValidationError::InvalidEmail)?;
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(email)
}

/// What a sign-up produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub user_id: Uuid,
    /// Absent when the provider wants the address confirmed first.
    pub session: Option<Session>,
    pub profile_created: bool,
}

impl SignUpOutcome {
    /// Notice to show even though sign-up succeeded.
    #[must_use]
    pub fn notice(&self) -> Option<&'static str> {
        (!self.profile_created).then_some(PROFILE_BOOTSTRAP_FAILED)
    }
}

pub struct LoginService {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    methods: AuthMethods,
    oauth_provider: String,
}

impl LoginService {
    #[must_use]
    pub fn new(backend: &Backend, config: &AppConfig) -> Self {
        Self {
            auth: backend.auth.clone(),
            profiles: backend.profiles.clone(),
            methods: config.auth_methods,
            oauth_provider: config.oauth_provider.clone(),
        }
    }

    #[must_use]
    pub fn methods(&self) -> AuthMethods {
        self.methods
    }

    fn require_password(&self) -> Result<(), ServiceError> {
        if self.methods.password { Ok(()) } else { Err(ServiceError::MethodDisabled("Password")) }
    }

    fn require_oauth(&self) -> Result<(), ServiceError> {
        if self.methods.oauth { Ok(()) } else { Err(ServiceError::MethodDisabled("OAuth")) }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        self.require_password()?;
        let email = validate_credentials(email, password)?;
        let session = self.auth.sign_in_with_password(&email, password).await?;
        info!(user_id = %session.user_id, "signed in with password");
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, ServiceError> {
        self.require_password()?;
        let email = validate_credentials(email, password)?;
        let signup = self.auth.sign_up(&email, password).await?;
        if signup.user_id.is_nil() {
            return Err(ServiceError::NoUserReturned);
        }

        let profile = bootstrap_profile(signup.user_id, &email);
        let profile_created = match self.profiles.insert_profile(&profile).await {
            Ok(()) => true,
            Err(e) => self.profile_exists_after(signup.user_id, &e).await,
        };
        info!(user_id = %signup.user_id, confirmed = signup.session.is_some(), "signed up");
        Ok(SignUpOutcome { user_id: signup.user_id, session: signup.session, profile_created })
    }

    /// After a failed bootstrap insert: the gate may have created the row
    /// first (the insert then conflicts), so only report failure when no
    /// profile exists.
    async fn profile_exists_after(&self, user_id: Uuid, error: &StoreError) -> bool {
        if let StoreError::Response { status: 409, .. } = error {
            debug!(%user_id, "profile already created at signup");
            return true;
        }
        match self.profiles.get_profile(user_id).await {
            Ok(Some(_)) => {
                debug!(%user_id, error = %error, "profile present despite failed insert");
                true
            }
            Ok(None) => {
                warn!(error = %error, %user_id, "profile creation after signup failed");
                false
            }
            Err(lookup) => {
                warn!(error = %error, lookup_error = %lookup, %user_id, "profile creation after signup failed");
                false
            }
        }
    }

    /// Start the OAuth flow; returns the URL to open.
    pub async fn sign_in_with_oauth(&self) -> Result<String, ServiceError> {
        self.require_oauth()?;
        Ok(self.auth.sign_in_with_oauth(&self.oauth_provider).await?)
    }

    /// Finish the OAuth flow from the redirect URL.
    pub async fn complete_oauth(&self, callback_url: &str) -> Result<Session, ServiceError> {
        self.require_oauth()?;
        let session = self.auth.complete_oauth(callback_url).await?;
        info!(user_id = %session.user_id, provider = %self.oauth_provider, "signed in with oauth");
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), ServiceError> {
        self.auth.sign_out().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "login_test.rs"]
mod tests;
