//! Profile resolution: look up the signed-in user's profile, creating a
//! placeholder when none exists, and classify it.

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use super::GateState;
use crate::backend::{ProfileStore, StoreError};
use crate::types::Profile;

/// Exclusive upper bound of the numeric username suffix.
pub const USERNAME_SUFFIX_BOUND: u32 = 1000;

fn local_part(email: &str) -> &str {
    email
        .split('@')
        .next()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("user")
}

/// Default username: email local part plus a number below 1000.
#[must_use]
pub fn generate_username(email: &str) -> String {
    let suffix = rand::rng().random_range(0..USERNAME_SUFFIX_BOUND);
    format!("{}{suffix}", local_part(email))
}

/// Placeholder profile for a user who has none yet.
#[must_use]
pub fn bootstrap_profile(user_id: Uuid, email: &str) -> Profile {
    Profile { id: user_id, username: Some(generate_username(email)), avatar_url: Some(String::new()) }
}

/// Classify the profile of `user_id`, creating one if it is missing.
///
/// A failed creation is logged and still yields
/// [`GateState::AuthenticatedIncomplete`]; only a failed lookup is an error.
pub async fn resolve_profile(profiles: &dyn ProfileStore, user_id: Uuid, email: &str) -> Result<GateState, StoreError> {
    match profiles.get_profile(user_id).await? {
        Some(profile) if profile.is_complete() => Ok(GateState::AuthenticatedComplete),
        Some(_) => Ok(GateState::AuthenticatedIncomplete),
        None => {
            let profile = bootstrap_profile(user_id, email);
            match profiles.insert_profile(&profile).await {
                Ok(()) => info!(%user_id, username = ?profile.username, "created placeholder profile"),
                Err(e) => warn!(error = %e, %user_id, "placeholder profile creation failed"),
            }
            Ok(GateState::AuthenticatedIncomplete)
        }
    }
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod tests;
