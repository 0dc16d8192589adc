//! chatgate: messaging client core over a hosted backend.
//!
//! ARCHITECTURE
//! ============
//! Authentication, row storage, realtime change feeds, and object storage
//! are external collaborators reached through the traits in [`backend`].
//! The [`gate`] owns the one piece of real state: which screen a user may
//! see given their session and profile completeness. [`services`] hold the
//! per-screen logic and [`shell`] is a terminal front end over both.

pub mod backend;
pub mod config;
pub mod gate;
pub mod services;
pub mod shell;
pub mod types;
