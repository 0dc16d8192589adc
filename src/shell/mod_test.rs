use std::sync::Mutex;
use std::time::Duration;

use super::*;
use crate::backend::memory::{Fault, MemoryBackend};
use crate::types::Profile;

// =============================================================================
// HARNESS
// =============================================================================

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Harness {
    memory: Arc<MemoryBackend>,
    gate: Arc<Gate>,
    shell: Shell,
    out: Output,
    _gate_task: tokio::task::JoinHandle<()>,
}

async fn harness_with(config: AppConfig) -> Harness {
    let memory = Arc::new(MemoryBackend::new());
    let backend = Backend::from_client(memory.clone());
    let gate = Arc::new(Gate::from_backend(&backend));
    let gate_task = gate.clone().spawn();
    wait_for(&gate, GateState::Unauthenticated).await;
    let out = Output::default();
    let shell = Shell::new(backend, config, gate.clone(), Box::new(out.clone()));
    Harness { memory, gate, shell, out, _gate_task: gate_task }
}

async fn harness() -> Harness {
    harness_with(AppConfig::default()).await
}

async fn wait_for(gate: &Gate, state: GateState) {
    for _ in 0..200 {
        if gate.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("gate never reached {state:?}, stuck at {:?}", gate.state());
}

async fn run(h: &mut Harness, line: &str) -> Flow {
    let command = command::parse(line).unwrap().unwrap();
    h.shell.handle(command).await
}

/// Sign in a user whose profile is already complete.
async fn signed_in_complete(h: &mut Harness, email: &str) -> Uuid {
    let id = h.memory.register(email, "pw");
    h.memory.put_profile(Profile {
        id,
        username: Some("neo".into()),
        avatar_url: Some("http://x/neo.png".into()),
    });
    run(h, &format!("login {email} pw")).await;
    wait_for(&h.gate, GateState::AuthenticatedComplete).await;
    id
}

// =============================================================================
// LOGIN
// =============================================================================

#[tokio::test]
async fn bad_credentials_show_backend_message() {
    let mut h = harness().await;
    run(&mut h, "login who@x.io nope").await;
    assert!(h.out.text().contains("Invalid login credentials"));
    assert_eq!(h.gate.state(), GateState::Unauthenticated);
}

#[tokio::test]
async fn signup_lands_on_setup() {
    let mut h = harness().await;
    run(&mut h, "signup new@x.io pw").await;
    wait_for(&h.gate, GateState::AuthenticatedIncomplete).await;
    assert_eq!(h.gate.screen(), Some(Screen::Setup));
    assert!(h.out.text().contains("Account created. Signed in as new@x.io."));
}

#[tokio::test]
async fn disabled_password_login_is_refused() {
    let mut config = AppConfig::default();
    config.auth_methods.password = false;
    let mut h = harness_with(config).await;
    run(&mut h, "login a@x.io pw").await;
    assert!(h.out.text().contains("Password login is not enabled."));
}

#[tokio::test]
async fn oauth_round_trip() {
    let mut h = harness().await;
    run(&mut h, "oauth").await;
    assert!(h.out.text().contains("memory://oauth/authorize?provider=google"));
    run(&mut h, "callback memory://oauth/callback?email=o@x.io").await;
    wait_for(&h.gate, GateState::AuthenticatedIncomplete).await;
    assert!(h.out.text().contains("Signed in as o@x.io."));
}

#[tokio::test]
async fn logout_returns_to_login() {
    let mut h = harness().await;
    signed_in_complete(&mut h, "a@x.io").await;
    run(&mut h, "logout").await;
    wait_for(&h.gate, GateState::Unauthenticated).await;
    assert_eq!(h.gate.screen(), Some(Screen::Login));
}

// =============================================================================
// SETUP & PROFILE
// =============================================================================

#[tokio::test]
async fn setup_completes_profile() {
    let mut h = harness().await;
    run(&mut h, "signup new@x.io pw").await;
    wait_for(&h.gate, GateState::AuthenticatedIncomplete).await;

    run(&mut h, "setup neo http://x/neo.png").await;
    assert_eq!(h.gate.state(), GateState::AuthenticatedComplete);
    assert_eq!(h.gate.screen(), Some(Screen::Main));
    assert!(h.out.text().contains("Profile saved."));
}

#[tokio::test]
async fn setup_without_avatar_saves_username_only() {
    let mut h = harness().await;
    run(&mut h, "signup new@x.io pw").await;
    wait_for(&h.gate, GateState::AuthenticatedIncomplete).await;
    let id = h.gate.session().unwrap().user_id;

    run(&mut h, "setup neo").await;
    assert_eq!(h.gate.state(), GateState::AuthenticatedIncomplete);
    assert_eq!(h.gate.screen(), Some(Screen::Setup));
    assert_eq!(h.memory.profile(id).unwrap().username.as_deref(), Some("neo"));
    assert!(h.out.text().contains("Your profile still needs"));
}

#[tokio::test]
async fn setup_is_unavailable_once_complete() {
    let mut h = harness().await;
    signed_in_complete(&mut h, "a@x.io").await;
    run(&mut h, "setup other http://x/o.png").await;
    assert!(h.out.text().contains("/setup is not available right now."));
    assert_eq!(h.gate.screen(), Some(Screen::Main));
}

#[tokio::test]
async fn incomplete_user_cannot_reach_chats() {
    let mut h = harness().await;
    run(&mut h, "signup new@x.io pw").await;
    wait_for(&h.gate, GateState::AuthenticatedIncomplete).await;
    run(&mut h, "chats").await;
    assert!(h.out.text().contains("/ is not available right now."));
    assert_eq!(h.gate.screen(), Some(Screen::Setup));
}

#[tokio::test]
async fn profile_set_uploads_avatar_file() {
    let mut h = harness().await;
    let id = signed_in_complete(&mut h, "a@x.io").await;
    let path = std::env::temp_dir().join(format!("chatgate-{id}.png"));
    tokio::fs::write(&path, [7u8, 8, 9]).await.unwrap();

    run(&mut h, &format!("profile set trinity {}", path.display())).await;
    let stored = h.memory.profile(id).unwrap();
    assert_eq!(stored.username.as_deref(), Some("trinity"));
    assert_eq!(stored.avatar_url, Some(format!("memory://avatars/{id}.png")));
    assert_eq!(h.memory.blob("avatars", &format!("{id}.png")), Some(vec![7, 8, 9]));
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn missing_avatar_file_is_reported() {
    let mut h = harness().await;
    signed_in_complete(&mut h, "a@x.io").await;
    run(&mut h, "profile set trinity /nonexistent/me.png").await;
    assert!(h.out.text().contains("Could not read /nonexistent/me.png"));
}

#[tokio::test]
async fn failed_lookup_offers_retry() {
    let mut h = harness().await;
    let id = h.memory.register("a@x.io", "pw");
    h.memory.put_profile(Profile { id, username: Some("neo".into()), avatar_url: Some("http://x".into()) });
    h.memory.set_fault(Fault::ProfileLookup, true);
    let mut events = h.gate.subscribe();
    run(&mut h, "login a@x.io pw").await;

    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        if matches!(event, GateEvent::ResolveFailed { .. }) {
            h.shell.render_event(&event);
            break;
        }
    }
    assert!(h.out.text().contains("Type `retry`"));

    h.memory.set_fault(Fault::ProfileLookup, false);
    run(&mut h, "retry").await;
    assert_eq!(h.gate.state(), GateState::AuthenticatedComplete);
}

// =============================================================================
// CHATS
// =============================================================================

#[tokio::test]
async fn list_open_and_send() {
    let mut h = harness().await;
    let me = signed_in_complete(&mut h, "a@x.io").await;
    let other = Uuid::new_v4();
    h.memory.put_profile(Profile { id: other, username: Some("morpheus".into()), avatar_url: None });
    let chat = h.memory.create_chat(me, other);

    run(&mut h, "chats").await;
    assert!(h.out.text().contains("1. morpheus <https://placehold.co/40>"));

    run(&mut h, "open 1").await;
    assert_eq!(h.gate.screen(), Some(Screen::ChatRoom(chat.id)));
    assert!(h.out.text().contains("No messages yet."));

    run(&mut h, "send hello there").await;
    let incoming = tokio::time::timeout(Duration::from_secs(2), next_message(&mut h.shell.room))
        .await
        .unwrap()
        .unwrap();
    h.shell.render_message(&incoming);
    assert!(h.out.text().contains("you: hello there"));
}

#[tokio::test]
async fn open_unknown_position_is_reported() {
    let mut h = harness().await;
    signed_in_complete(&mut h, "a@x.io").await;
    run(&mut h, "open 3").await;
    assert!(h.out.text().contains("No such chat."));
}

#[tokio::test]
async fn send_without_room_is_reported() {
    let mut h = harness().await;
    signed_in_complete(&mut h, "a@x.io").await;
    run(&mut h, "send hi").await;
    assert!(h.out.text().contains("Open a chat first."));
}

#[tokio::test]
async fn back_returns_to_chat_list() {
    let mut h = harness().await;
    let me = signed_in_complete(&mut h, "a@x.io").await;
    let chat = h.memory.create_chat(me, Uuid::new_v4());
    run(&mut h, &format!("open {}", chat.id)).await;
    assert!(h.shell.room.is_some());
    run(&mut h, "back").await;
    assert!(h.shell.room.is_none());
    assert_eq!(h.gate.screen(), Some(Screen::Main));
}

// =============================================================================
// SESSION
// =============================================================================

#[tokio::test]
async fn whoami_and_quit() {
    let mut h = harness().await;
    run(&mut h, "whoami").await;
    assert!(h.out.text().contains("not signed in | signed out | /login"));
    assert_eq!(run(&mut h, "quit").await, Flow::Quit);
}

#[tokio::test]
async fn run_reads_until_eof() {
    let h = harness().await;
    let input: &[u8] = b"help\nbogus\n";
    h.shell.run(input).await.unwrap();
    let text = h.out.text();
    assert!(text.contains("Sign-in methods: login/signup, oauth"));
    assert!(text.contains("sign in with email and password"));
    assert!(text.contains("unknown command `bogus`"));
}
