use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::backend::memory::{Fault, MemoryBackend};
use crate::backend::StoreError;
use crate::types::{Profile, ProfilePatch};

fn gate_over(backend: &Arc<MemoryBackend>) -> Gate {
    Gate::from_backend(&Backend::from_client(backend.clone()))
}

fn complete_profile(id: Uuid) -> Profile {
    Profile { id, username: Some("bob".into()), avatar_url: Some("http://x/a.png".into()) }
}

async fn next_transition(rx: &mut broadcast::Receiver<GateEvent>) -> GateEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("gate event within timeout")
        .expect("event channel open")
}

/// Wait until the gate reaches `state`, polling its snapshot.
async fn settle(gate: &Gate, state: GateState) {
    for _ in 0..200 {
        if gate.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("gate never reached {state:?}, stuck at {:?}", gate.state());
}

// =========================================================================
// Profile store that holds one user's lookup until released
// =========================================================================

struct HeldProfiles {
    inner: MemoryBackend,
    hold: Uuid,
    release: Notify,
    entered: Notify,
}

#[async_trait]
impl ProfileStore for HeldProfiles {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        if id == self.hold {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get_profile(id).await
    }

    async fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>, StoreError> {
        self.inner.get_profiles(ids).await
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<(), StoreError> {
        self.inner.update_profile(id, patch).await
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn initial_state_is_loading() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    assert_eq!(gate.state(), GateState::Loading);
    assert_eq!(gate.screen(), None);
}

#[tokio::test]
async fn no_session_goes_to_login() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    assert_eq!(gate.start().await, GateState::Unauthenticated);
    assert_eq!(gate.screen(), Some(Screen::Login));
    assert!(gate.session().is_none());
}

#[tokio::test]
async fn session_fetch_failure_is_treated_as_signed_out() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_fault(Fault::SessionFetch, true);
    let gate = gate_over(&backend);
    assert_eq!(gate.start().await, GateState::Unauthenticated);
    assert_eq!(gate.screen(), Some(Screen::Login));
}

#[tokio::test]
async fn partial_profile_goes_to_setup() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    backend.put_profile(Profile { id, username: Some("bob".into()), avatar_url: Some(String::new()) });
    let gate = gate_over(&backend);

    let state = gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    assert_eq!(state, GateState::AuthenticatedIncomplete);
    assert_eq!(gate.screen(), Some(Screen::Setup));
    assert_eq!(gate.navigate(Screen::Main), Screen::Setup);
}

#[tokio::test]
async fn complete_profile_goes_to_main_and_setup_redirects() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    backend.put_profile(complete_profile(id));
    let gate = gate_over(&backend);

    let state = gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    assert_eq!(state, GateState::AuthenticatedComplete);
    assert_eq!(gate.screen(), Some(Screen::Main));
    assert_eq!(gate.navigate(Screen::Setup), Screen::Main);
    assert_eq!(gate.navigate(Screen::Profile), Screen::Profile);
}

#[tokio::test]
async fn sign_out_from_main_returns_to_login_and_clears_session() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    backend.put_profile(complete_profile(id));
    let gate = gate_over(&backend);
    gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    assert_eq!(gate.screen(), Some(Screen::Main));

    assert_eq!(gate.on_auth_change(None).await, GateState::Unauthenticated);
    assert_eq!(gate.screen(), Some(Screen::Login));
    assert!(gate.session().is_none());
    assert_eq!(gate.refresh().await, GateState::Unauthenticated);
}

#[tokio::test]
async fn new_user_gets_generated_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    let gate = gate_over(&backend);

    let state = gate.on_auth_change(Some(Session::new(id, "carol@example.com"))).await;
    assert_eq!(state, GateState::AuthenticatedIncomplete);
    let profile = backend.profile(id).expect("profile created");
    let username = profile.username.unwrap();
    let suffix: u32 = username.strip_prefix("carol").unwrap().parse().unwrap();
    assert!(suffix < 1000);
    assert_eq!(profile.avatar_url.as_deref(), Some(""));
}

#[tokio::test]
async fn unauthenticated_session_value_counts_as_absent() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    let mut session = Session::new(Uuid::new_v4(), "x@x.io");
    session.authenticated = false;
    assert_eq!(gate.on_auth_change(Some(session)).await, GateState::Unauthenticated);
    assert_eq!(backend.profile_lookups(), 0);
}

// =========================================================================
// Refresh, failures, events
// =========================================================================

#[tokio::test]
async fn refresh_after_profile_completion_moves_to_main() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    let gate = gate_over(&backend);
    gate.on_auth_change(Some(Session::new(id, "h@x.io"))).await;
    assert_eq!(gate.screen(), Some(Screen::Setup));

    let patch = ProfilePatch { username: Some("h".into()), avatar_url: Some("http://x/h.png".into()) };
    backend.update_profile(id, &patch).await.unwrap();
    assert_eq!(gate.refresh().await, GateState::AuthenticatedComplete);
    assert_eq!(gate.screen(), Some(Screen::Main));
}

#[tokio::test]
async fn lookup_failure_keeps_screen_and_reports() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    gate.start().await;
    let mut events = gate.subscribe();

    backend.set_fault(Fault::ProfileLookup, true);
    let id = Uuid::new_v4();
    gate.on_auth_change(Some(Session::new(id, "i@x.io"))).await;

    assert_eq!(gate.screen(), Some(Screen::Login));
    assert_eq!(gate.state(), GateState::AuthenticatedIncomplete);
    assert_eq!(gate.navigate(Screen::Main), Screen::Setup);
    assert!(matches!(next_transition(&mut events).await, GateEvent::Transition { state: GateState::Loading, .. }));
    assert_eq!(
        next_transition(&mut events).await,
        GateEvent::Transition {
            state: GateState::AuthenticatedIncomplete,
            screen: Some(Screen::Login),
            user_id: Some(id)
        }
    );
    match next_transition(&mut events).await {
        GateEvent::ResolveFailed { user_id, .. } => assert_eq!(user_id, id),
        other => panic!("expected ResolveFailed, got {other:?}"),
    }

    backend.set_fault(Fault::ProfileLookup, false);
    assert_eq!(gate.refresh().await, GateState::AuthenticatedIncomplete);
}

#[tokio::test]
async fn failed_re_resolution_restores_incomplete_state() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    let id = Uuid::new_v4();
    backend.put_profile(Profile { id, username: Some("bob".into()), avatar_url: Some(String::new()) });
    let session = Session::new(id, "bob@x.io");

    gate.on_auth_change(Some(session.clone())).await;
    assert_eq!(gate.state(), GateState::AuthenticatedIncomplete);
    assert_eq!(gate.navigate(Screen::Main), Screen::Setup);

    backend.set_fault(Fault::ProfileLookup, true);
    gate.on_auth_change(Some(session)).await;
    assert_eq!(gate.state(), GateState::AuthenticatedIncomplete);
    assert_eq!(gate.navigate(Screen::Main), Screen::Setup);
    assert_eq!(gate.navigate(Screen::Profile), Screen::Setup);
    assert_eq!(gate.navigate(Screen::ChatRoom(Uuid::new_v4())), Screen::Setup);
}

#[tokio::test]
async fn failed_refresh_keeps_complete_user_where_they_are() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    let id = Uuid::new_v4();
    backend.put_profile(complete_profile(id));
    gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    let chat = Uuid::new_v4();
    gate.navigate(Screen::ChatRoom(chat));

    backend.set_fault(Fault::ProfileLookup, true);
    assert_eq!(gate.refresh().await, GateState::AuthenticatedComplete);
    assert_eq!(gate.screen(), Some(Screen::ChatRoom(chat)));
}

#[tokio::test]
async fn failed_lookup_for_new_user_does_not_inherit_previous_outcome() {
    let backend = Arc::new(MemoryBackend::new());
    let gate = gate_over(&backend);
    let first = Uuid::new_v4();
    backend.put_profile(complete_profile(first));
    gate.on_auth_change(Some(Session::new(first, "bob@x.io"))).await;
    assert_eq!(gate.state(), GateState::AuthenticatedComplete);

    backend.set_fault(Fault::ProfileLookup, true);
    gate.on_auth_change(Some(Session::new(Uuid::new_v4(), "eve@x.io"))).await;
    assert_eq!(gate.state(), GateState::AuthenticatedIncomplete);
    assert_eq!(gate.navigate(Screen::Main), Screen::Setup);
}

#[tokio::test]
async fn transitions_are_published_in_order() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    backend.put_profile(complete_profile(id));
    let gate = gate_over(&backend);
    let mut events = gate.subscribe();

    gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;

    assert_eq!(
        next_transition(&mut events).await,
        GateEvent::Transition { state: GateState::Loading, screen: None, user_id: Some(id) }
    );
    assert_eq!(
        next_transition(&mut events).await,
        GateEvent::Transition { state: GateState::AuthenticatedComplete, screen: Some(Screen::Main), user_id: Some(id) }
    );
}

#[tokio::test]
async fn complete_user_in_chat_room_stays_there_on_token_refresh() {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    backend.put_profile(complete_profile(id));
    let gate = gate_over(&backend);
    gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    let room = Screen::ChatRoom(Uuid::new_v4());
    assert_eq!(gate.navigate(room), room);

    gate.on_auth_change(Some(Session::new(id, "bob@x.io"))).await;
    assert_eq!(gate.screen(), Some(room));
}

// =========================================================================
// Stale results
// =========================================================================

#[tokio::test]
async fn stale_resolution_is_discarded() {
    let slow_user = Uuid::new_v4();
    let fast_user = Uuid::new_v4();
    let store = Arc::new(HeldProfiles {
        inner: MemoryBackend::new(),
        hold: slow_user,
        release: Notify::new(),
        entered: Notify::new(),
    });
    store.inner.put_profile(complete_profile(fast_user));
    let auth = Arc::new(MemoryBackend::new());
    let gate = Arc::new(Gate::new(auth, store.clone()));

    let ticket = gate.begin(Some(Session::new(slow_user, "slow@x.io"))).unwrap();
    let pending = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.finish(ticket).await })
    };
    store.entered.notified().await;

    assert_eq!(
        gate.on_auth_change(Some(Session::new(fast_user, "fast@x.io"))).await,
        GateState::AuthenticatedComplete
    );

    store.release.notify_one();
    let after_stale = pending.await.unwrap();
    assert_eq!(after_stale, GateState::AuthenticatedComplete);
    assert_eq!(gate.session().map(|s| s.user_id), Some(fast_user));
    assert_eq!(gate.screen(), Some(Screen::Main));
}

#[tokio::test]
async fn sign_out_supersedes_in_flight_resolution() {
    let user = Uuid::new_v4();
    let store = Arc::new(HeldProfiles {
        inner: MemoryBackend::new(),
        hold: user,
        release: Notify::new(),
        entered: Notify::new(),
    });
    store.inner.put_profile(complete_profile(user));
    let gate = Arc::new(Gate::new(Arc::new(MemoryBackend::new()), store.clone()));

    let ticket = gate.begin(Some(Session::new(user, "u@x.io"))).unwrap();
    let pending = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.finish(ticket).await })
    };
    store.entered.notified().await;
    gate.on_auth_change(None).await;
    store.release.notify_one();

    assert_eq!(pending.await.unwrap(), GateState::Unauthenticated);
    assert_eq!(gate.screen(), Some(Screen::Login));
}

// =========================================================================
// Run loop
// =========================================================================

#[tokio::test]
async fn spawned_gate_follows_provider_notifications() {
    let backend = Arc::new(MemoryBackend::new());
    backend.register("j@x.io", "pw");
    let gate = Arc::new(gate_over(&backend));
    let task = Arc::clone(&gate).spawn();

    settle(&gate, GateState::Unauthenticated).await;

    backend.sign_in_with_password("j@x.io", "pw").await.unwrap();
    settle(&gate, GateState::AuthenticatedIncomplete).await;
    assert_eq!(gate.screen(), Some(Screen::Setup));

    backend.sign_out().await.unwrap();
    settle(&gate, GateState::Unauthenticated).await;
    assert_eq!(gate.screen(), Some(Screen::Login));

    task.abort();
}

#[tokio::test]
async fn spawned_gate_resumes_existing_session() {
    let backend = Arc::new(MemoryBackend::new());
    backend.register("k@x.io", "pw");
    let session = backend.sign_in_with_password("k@x.io", "pw").await.unwrap();
    backend.put_profile(complete_profile(session.user_id));

    let gate = Arc::new(gate_over(&backend));
    let task = Arc::clone(&gate).spawn();
    settle(&gate, GateState::AuthenticatedComplete).await;
    assert_eq!(gate.screen(), Some(Screen::Main));
    task.abort();
}
