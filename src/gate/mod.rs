//! Session/profile gate.
//!
//! ARCHITECTURE
//! ============
//! The gate turns auth provider notifications into a [`GateState`] and a
//! [`Screen`]. A session arrives, the gate enters `Loading`, looks up the
//! profile, and settles on `AuthenticatedIncomplete` or
//! `AuthenticatedComplete`. An absent session goes straight to
//! `Unauthenticated`. Every change is published as a [`GateEvent`] on a
//! broadcast channel; the presentation layer renders from those events.
//!
//! ORDERING
//! ========
//! Handling a notification is split in two: [`Gate::begin`] records the new
//! session synchronously and hands back a [`ResolveTicket`] stamped with an
//! epoch, and [`Gate::finish`] performs the lookup. A result whose epoch is
//! no longer current is dropped, so the most recently received session
//! always wins even when lookups complete out of order.
//!
//! ERROR HANDLING
//! ==============
//! A failed lookup keeps the screen, puts the state back to the last settled
//! outcome for the same user, and emits [`GateEvent::ResolveFailed`]; the
//! caller may retry with [`Gate::refresh`]. With no earlier outcome for that
//! user the gate fails closed on `AuthenticatedIncomplete`, so only setup is
//! reachable.

pub mod resolve;
pub mod routing;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AuthProvider, Backend, ProfileStore};
use crate::types::Session;
pub use resolve::resolve_profile;
pub use routing::Screen;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where the current user stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    Unauthenticated,
    Loading,
    AuthenticatedIncomplete,
    AuthenticatedComplete,
}

/// Published on every gate change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    Transition { state: GateState, screen: Option<Screen>, user_id: Option<Uuid> },
    /// The profile lookup for `user_id` failed; the screen was kept.
    ResolveFailed { user_id: Uuid, error: String },
}

/// A pending profile resolution for one received session value.
#[derive(Debug, Clone)]
pub struct ResolveTicket {
    epoch: u64,
    session: Session,
}

impl ResolveTicket {
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

struct GateInner {
    state: GateState,
    session: Option<Session>,
    screen: Option<Screen>,
    /// Last lookup outcome for the current session's user.
    settled: Option<GateState>,
    epoch: u64,
}

impl GateInner {
    fn transition(&self) -> GateEvent {
        GateEvent::Transition {
            state: self.state,
            screen: self.screen,
            user_id: self.session.as_ref().map(|s| s.user_id),
        }
    }
}

pub struct Gate {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    inner: Mutex<GateInner>,
    events: broadcast::Sender<GateEvent>,
}

impl Gate {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            auth,
            profiles,
            inner: Mutex::new(GateInner { state: GateState::Loading, session: None, screen: None, settled: None, epoch: 0 }),
            events,
        }
    }

    #[must_use]
    pub fn from_backend(backend: &Backend) -> Self {
        Self::new(backend.auth.clone(), backend.profiles.clone())
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: GateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        self.lock().state
    }

    #[must_use]
    pub fn screen(&self) -> Option<Screen> {
        self.lock().screen
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Fetch the provider's current session and resolve it.
    ///
    /// A fetch failure is treated as no session.
    pub async fn start(&self) -> GateState {
        let session = match self.auth.current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "current session fetch failed; treating as signed out");
                None
            }
        };
        self.on_auth_change(session).await
    }

    /// Handle one auth change notification to completion.
    pub async fn on_auth_change(&self, session: Option<Session>) -> GateState {
        if let Some(ticket) = self.begin(session) {
            self.finish(ticket).await;
        }
        self.state()
    }

    /// Record a new session value. Returns a ticket when a profile lookup is
    /// needed; an absent session settles immediately on `Unauthenticated`.
    pub fn begin(&self, session: Option<Session>) -> Option<ResolveTicket> {
        let mut inner = self.lock();
        inner.epoch += 1;
        let epoch = inner.epoch;
        match session.filter(|s| s.authenticated) {
            Some(session) => {
                debug!(user_id = %session.user_id, epoch, "session received");
                if inner.session.as_ref().map(|s| s.user_id) != Some(session.user_id) {
                    inner.settled = None;
                }
                inner.state = GateState::Loading;
                inner.session = Some(session.clone());
                self.publish(inner.transition());
                Some(ResolveTicket { epoch, session })
            }
            None => {
                if inner.session.take().is_some() {
                    info!("session ended");
                }
                inner.settled = None;
                inner.state = GateState::Unauthenticated;
                inner.screen = Some(Screen::Login);
                self.publish(inner.transition());
                None
            }
        }
    }

    /// Resolve the profile for `ticket` and apply the result if the ticket is
    /// still current. Returns the gate state afterwards.
    pub async fn finish(&self, ticket: ResolveTicket) -> GateState {
        let user_id = ticket.session.user_id;
        let result = resolve_profile(self.profiles.as_ref(), user_id, &ticket.session.email).await;

        let mut inner = self.lock();
        if inner.epoch != ticket.epoch {
            debug!(%user_id, epoch = ticket.epoch, current = inner.epoch, "discarding stale profile resolution");
            return inner.state;
        }
        match result {
            Ok(state) => {
                inner.state = state;
                inner.settled = Some(state);
                inner.screen = routing::landing(state, inner.screen);
                info!(%user_id, ?state, screen = ?inner.screen, "gate settled");
                self.publish(inner.transition());
            }
            Err(e) => {
                inner.state = inner.settled.unwrap_or(GateState::AuthenticatedIncomplete);
                warn!(error = %e, %user_id, state = ?inner.state, "profile lookup failed; keeping current screen");
                self.publish(inner.transition());
                self.publish(GateEvent::ResolveFailed { user_id, error: e.to_string() });
            }
        }
        inner.state
    }

    /// Re-run resolution for the current session, e.g. after the user saved
    /// their profile.
    pub async fn refresh(&self) -> GateState {
        match self.session() {
            Some(session) => self.on_auth_change(Some(session)).await,
            None => self.state(),
        }
    }

    /// Request a screen. The routing guard may redirect; the screen actually
    /// shown is returned and recorded.
    pub fn navigate(&self, requested: Screen) -> Screen {
        let mut inner = self.lock();
        let screen = routing::guard(inner.state, requested);
        if screen != requested {
            debug!(?requested, ?screen, state = ?inner.state, "navigation redirected");
        }
        if inner.screen != Some(screen) {
            inner.screen = Some(screen);
            self.publish(inner.transition());
        }
        screen
    }

    /// Run the gate for the life of the returned task: resolve the current
    /// session, then follow the provider's change feed.
    ///
    /// Notifications are recorded in arrival order; lookups run concurrently
    /// and stale ones are discarded.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut sessions = self.auth.watch_sessions();
        tokio::spawn(async move {
            self.start().await;
            while let Some(session) = sessions.recv().await {
                if let Some(ticket) = self.begin(session) {
                    let gate = Arc::clone(&self);
                    tokio::spawn(async move {
                        gate.finish(ticket).await;
                    });
                }
            }
            debug!("session feed closed; gate loop exiting");
        })
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
