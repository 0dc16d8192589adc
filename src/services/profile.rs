//! Profile settings screen: rename and replace the avatar.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::upload::avatar_path;
use super::{ServiceError, ValidationError};
use crate::backend::{Backend, BlobStore, ProfileStore, UploadOptions};
use crate::types::{ImageFile, Profile, ProfilePatch};

pub struct ProfileService {
    profiles: Arc<dyn ProfileStore>,
    blobs: Arc<dyn BlobStore>,
    bucket: String,
}

impl ProfileService {
    #[must_use]
    pub fn new(backend: &Backend, avatar_bucket: impl Into<String>) -> Self {
        Self { profiles: backend.profiles.clone(), blobs: backend.blobs.clone(), bucket: avatar_bucket.into() }
    }

    pub async fn load(&self, user_id: Uuid) -> Result<Profile, ServiceError> {
        self.profiles
            .get_profile(user_id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Save a new username and, optionally, a new avatar image.
    ///
    /// A failed avatar upload keeps the previous avatar URL; the username is
    /// still saved.
    pub async fn update(&self, user_id: Uuid, username: &str, avatar: Option<ImageFile>) -> Result<Profile, ServiceError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }
        let current = self.load(user_id).await?;

        let mut avatar_url = current.avatar_url;
        if let Some(file) = avatar {
            if file.bytes.is_empty() {
                return Err(ValidationError::EmptyFile.into());
            }
            let path = avatar_path(user_id, &file.name);
            let options = UploadOptions { content_type: Some(file.content_type), upsert: true };
            match self.blobs.upload(&self.bucket, &path, file.bytes, options).await {
                Ok(()) => avatar_url = Some(self.blobs.public_url(&self.bucket, &path)),
                Err(e) => warn!(error = %e, %user_id, %path, "avatar upload failed; keeping previous avatar"),
            }
        }

        let patch = ProfilePatch { username: Some(username.to_owned()), avatar_url };
        self.profiles.update_profile(user_id, &patch).await?;
        info!(%user_id, "profile updated");
        self.load(user_id).await
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
