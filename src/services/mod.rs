//! Per-screen client logic.
//!
//! ARCHITECTURE
//! ============
//! Each service owns the collaborator calls of one screen so the shell can
//! stay focused on input parsing and rendering. Services never panic on
//! backend failures: errors come back as [`ServiceError`] and
//! [`ServiceError::user_message`] gives the inline text to show.

pub mod chat_room;
pub mod chats;
pub mod login;
pub mod profile;
pub mod setup;
pub mod upload;

use crate::backend::StoreError;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Input rejected before any backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Please enter a password.")]
    EmptyPassword,
    #[error("Please choose a username.")]
    EmptyUsername,
    #[error("The selected file is empty.")]
    EmptyFile,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("backend failure: {0}")]
    Store(#[from] StoreError),
    #[error("login method disabled: {0}")]
    MethodDisabled(&'static str),
    #[error("signup returned no user")]
    NoUserReturned,
    #[error("profile not found")]
    NotFound,
    #[error("not signed in")]
    NotAuthenticated,
}

impl ServiceError {
    /// Text for the inline error line under a form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Store(StoreError::Response { status: 400..=499, body }) => backend_message(body),
            Self::Store(_) => GENERIC_FAILURE.to_owned(),
            Self::MethodDisabled(method) => format!("{method} login is not enabled."),
            Self::NoUserReturned => "Signup failed. No user returned.".to_owned(),
            Self::NotFound => "Profile not found.".to_owned(),
            Self::NotAuthenticated => "Please log in first.".to_owned(),
        }
    }
}

/// Pull the human-readable part out of a backend error body.
fn backend_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        ["msg", "message", "error_description", "error"]
            .iter()
            .find_map(|key| v.get(*key).and_then(serde_json::Value::as_str))
    });
    match message {
        Some(m) => m.to_owned(),
        None if body.trim().is_empty() => GENERIC_FAILURE.to_owned(),
        None => body.to_owned(),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
