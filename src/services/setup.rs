//! Profile setup screen: the one place an incomplete user may be.

use std::sync::Arc;

use tracing::info;

use super::{ServiceError, ValidationError};
use crate::backend::{Backend, ProfileStore};
use crate::gate::{Gate, GateState};
use crate::types::{Profile, ProfilePatch};

pub struct SetupService {
    profiles: Arc<dyn ProfileStore>,
    gate: Arc<Gate>,
}

impl SetupService {
    #[must_use]
    pub fn new(backend: &Backend, gate: Arc<Gate>) -> Self {
        Self { profiles: backend.profiles.clone(), gate }
    }

    /// The signed-in user's stored profile, for prefilling the form.
    pub async fn current(&self) -> Result<Option<Profile>, ServiceError> {
        let session = self.gate.session().ok_or(ServiceError::NotAuthenticated)?;
        Ok(self.profiles.get_profile(session.user_id).await?)
    }

    /// Save username and avatar URL, then let the gate re-evaluate.
    ///
    /// The avatar is optional here; without one the gate keeps the user on
    /// setup.
    pub async fn save(&self, username: &str, avatar_url: &str) -> Result<GateState, ServiceError> {
        let session = self.gate.session().ok_or(ServiceError::NotAuthenticated)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }
        let patch = ProfilePatch { username: Some(username.to_owned()), avatar_url: Some(avatar_url.trim().to_owned()) };
        self.profiles.update_profile(session.user_id, &patch).await?;
        info!(user_id = %session.user_id, "profile setup saved");
        Ok(self.gate.refresh().await)
    }
}

#[cfg(test)]
#[path = "setup_test.rs"]
mod tests;
