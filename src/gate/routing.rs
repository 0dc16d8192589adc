//! Screen routing rules derived from gate state.

use uuid::Uuid;

use super::GateState;

/// Screens the presentation layer can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Login,
    /// Profile completion, reachable only while the profile is incomplete.
    Setup,
    /// Chat list.
    Main,
    /// Profile settings.
    Profile,
    ChatRoom(Uuid),
}

impl Screen {
    /// Route path as the web client spelled it.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Login => "/login".to_owned(),
            Self::Setup => "/setup".to_owned(),
            Self::Main => "/".to_owned(),
            Self::Profile => "/profile".to_owned(),
            Self::ChatRoom(id) => format!("/chat/{id}"),
        }
    }
}

/// Where a request for `requested` actually lands in `state`.
///
/// No redirect is applied while loading; the outcome is not known yet.
#[must_use]
pub fn guard(state: GateState, requested: Screen) -> Screen {
    match state {
        GateState::Loading => requested,
        GateState::Unauthenticated => Screen::Login,
        GateState::AuthenticatedIncomplete => Screen::Setup,
        GateState::AuthenticatedComplete => match requested {
            Screen::Login | Screen::Setup => Screen::Main,
            other => other,
        },
    }
}

/// Screen to show after the gate settles in `state`, given the screen the
/// user was on. A complete user already on a permitted screen stays there.
#[must_use]
pub fn landing(state: GateState, current: Option<Screen>) -> Option<Screen> {
    match (state, current) {
        (GateState::Loading, current) => current,
        (GateState::AuthenticatedComplete, Some(current)) => Some(guard(state, current)),
        (GateState::AuthenticatedComplete, None) => Some(Screen::Main),
        (state, _) => Some(guard(state, Screen::Main)),
    }
}

#[cfg(test)]
#[path = "routing_test.rs"]
mod tests;
