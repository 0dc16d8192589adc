//! Interactive terminal front end.
//!
//! ARCHITECTURE
//! ============
//! The shell is a presentation layer only. It reads commands line by line,
//! calls the per-screen services, and renders [`GateEvent`]s and incoming
//! chat messages as they arrive. Screen changes always go through
//! [`Gate::navigate`], so the routing guard decides what is reachable.
//!
//! Output goes to the writer passed in (stdout in the binary); logs go to
//! stderr via `tracing`.

pub mod command;

use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::gate::{Gate, GateEvent, GateState, Screen};
use crate::services::ServiceError;
use crate::services::chat_room::ChatRoom;
use crate::services::chats::{ChatListService, ChatSummary};
use crate::services::login::LoginService;
use crate::services::profile::ProfileService;
use crate::services::setup::SetupService;
use crate::services::upload::content_type_for;
use crate::types::{ImageFile, Message, Session};
use command::{ChatRef, Command, HELP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    backend: Backend,
    config: AppConfig,
    gate: Arc<Gate>,
    login: LoginService,
    setup: SetupService,
    profile: ProfileService,
    chats: ChatListService,
    listing: Vec<ChatSummary>,
    room: Option<ChatRoom>,
    last_state: Option<GateState>,
    out: Box<dyn Write + Send>,
}

impl Shell {
    #[must_use]
    pub fn new(backend: Backend, config: AppConfig, gate: Arc<Gate>, out: Box<dyn Write + Send>) -> Self {
        Self {
            login: LoginService::new(&backend, &config),
            setup: SetupService::new(&backend, gate.clone()),
            profile: ProfileService::new(&backend, config.buckets.avatars.clone()),
            chats: ChatListService::new(&backend),
            backend,
            config,
            gate,
            listing: Vec::new(),
            room: None,
            last_state: None,
            out,
        }
    }

    /// Read commands from `input` until EOF or `quit`.
    pub async fn run<R>(mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut events = self.gate.subscribe();
        self.say("Type `help` for commands.");
        self.show_methods();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match command::parse(&line) {
                        Ok(Some(command)) => {
                            if self.handle(command).await == Flow::Quit {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => self.say(e),
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.render_event(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "shell fell behind gate events"),
                    Err(RecvError::Closed) => break,
                },
                incoming = next_message(&mut self.room) => match incoming {
                    Some(message) => self.render_message(&message),
                    None => {
                        self.say("Live updates for this chat stopped.");
                        self.leave_room();
                    }
                },
            }
        }
        self.room = None;
        debug!("shell exiting");
        Ok(())
    }

    /// Execute one command.
    pub async fn handle(&mut self, command: Command) -> Flow {
        let result = match command {
            Command::Quit => return Flow::Quit,
            Command::Help => {
                self.say(HELP);
                Ok(())
            }
            Command::Login { email, password } => self.login_with_password(&email, &password).await,
            Command::Signup { email, password } => self.signup(&email, &password).await,
            Command::OAuth => self.start_oauth().await,
            Command::Callback { url } => self.finish_oauth(&url).await,
            Command::Logout => self.logout().await,
            Command::Setup { username, avatar_url } => self.save_setup(&username, &avatar_url).await,
            Command::ShowProfile => self.show_profile().await,
            Command::SetProfile { username, avatar_path } => self.update_profile(&username, avatar_path.as_deref()).await,
            Command::Chats => self.list_chats().await,
            Command::Open(target) => self.open_chat(target).await,
            Command::Back => {
                self.leave_room();
                Ok(())
            }
            Command::Send { text } => self.send_text(&text).await,
            Command::Image { path } => self.send_image(&path).await,
            Command::Go(screen) => {
                self.go(screen);
                Ok(())
            }
            Command::Retry => {
                self.gate.refresh().await;
                Ok(())
            }
            Command::WhoAmI => {
                self.who_am_i();
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "command failed");
            self.say(e.user_message());
        }
        Flow::Continue
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    fn say(&mut self, text: impl Display) {
        if let Err(e) = writeln!(self.out, "{text}") {
            warn!(error = %e, "shell output failed");
        }
    }

    fn show_methods(&mut self) {
        let methods = self.login.methods();
        let mut offered = Vec::new();
        if methods.password {
            offered.push("login/signup");
        }
        if methods.oauth {
            offered.push("oauth");
        }
        self.say(format!("Sign-in methods: {}", offered.join(", ")));
    }

    fn render_event(&mut self, event: &GateEvent) {
        match event {
            GateEvent::Transition { state, screen, .. } => {
                if self.last_state != Some(*state) {
                    self.last_state = Some(*state);
                    self.say(format!("-- {}", state_label(*state)));
                }
                if let Some(screen) = screen {
                    self.say(format!("-> {}", screen.path()));
                }
                if *state == GateState::Unauthenticated {
                    self.listing.clear();
                }
                // Events can lag behind our own navigation; the gate's current
                // screen decides whether the open room is still shown.
                let current = self.gate.screen();
                if let Some(room) = &self.room {
                    if current != Some(Screen::ChatRoom(room.chat_id())) {
                        self.room = None;
                        self.say("Chat closed.");
                    }
                }
            }
            GateEvent::ResolveFailed { .. } => {
                self.say("Could not load your profile. Type `retry` to try again.");
            }
        }
    }

    fn render_message(&mut self, message: &Message) {
        let who = match &self.room {
            Some(room) if room.is_mine(message) => "you".to_owned(),
            _ => message.sender.clone(),
        };
        let line = match (&message.content, &message.image_url) {
            (Some(text), _) => format!("{who}: {text}"),
            (None, Some(url)) => format!("{who}: [image] {url}"),
            (None, None) => format!("{who}: (empty)"),
        };
        self.say(line);
    }

    fn who_am_i(&mut self) {
        let state = state_label(self.gate.state());
        let screen = self.gate.screen().map_or_else(|| "-".to_owned(), |s| s.path());
        match self.gate.session() {
            Some(session) => self.say(format!("{} ({}) | {state} | {screen}", session.email, session.user_id)),
            None => self.say(format!("not signed in | {state} | {screen}")),
        }
    }

    // =========================================================================
    // LOGIN
    // =========================================================================

    async fn login_with_password(&mut self, email: &str, password: &str) -> Result<(), ServiceError> {
        let session = self.login.sign_in(email, password).await?;
        self.say(format!("Signed in as {}.", session.email));
        Ok(())
    }

    async fn signup(&mut self, email: &str, password: &str) -> Result<(), ServiceError> {
        let outcome = self.login.sign_up(email, password).await?;
        if let Some(notice) = outcome.notice() {
            self.say(notice);
        }
        match outcome.session {
            Some(session) => self.say(format!("Account created. Signed in as {}.", session.email)),
            None => self.say("Account created. Check your email to confirm it, then log in."),
        }
        Ok(())
    }

    async fn start_oauth(&mut self) -> Result<(), ServiceError> {
        let url = self.login.sign_in_with_oauth().await?;
        self.say(format!("Open this URL to sign in with {}:", self.config.oauth_provider));
        self.say(url);
        self.say("Then paste the address you were sent back to: callback <url>");
        Ok(())
    }

    async fn finish_oauth(&mut self, url: &str) -> Result<(), ServiceError> {
        let session = self.login.complete_oauth(url).await?;
        self.say(format!("Signed in as {}.", session.email));
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ServiceError> {
        self.room = None;
        self.login.sign_out().await?;
        self.say("Signed out.");
        Ok(())
    }

    // =========================================================================
    // PROFILE
    // =========================================================================

    fn session(&self) -> Result<Session, ServiceError> {
        self.gate.session().ok_or(ServiceError::NotAuthenticated)
    }

    /// Navigate and report whether the guard let us through.
    fn enter(&mut self, screen: Screen) -> bool {
        let shown = self.gate.navigate(screen);
        if shown != screen {
            self.say(format!("{} is not available right now.", screen.path()));
        }
        shown == screen
    }

    async fn save_setup(&mut self, username: &str, avatar_url: &str) -> Result<(), ServiceError> {
        self.session()?;
        if !self.enter(Screen::Setup) {
            return Ok(());
        }
        let state = self.setup.save(username, avatar_url).await?;
        if state == GateState::AuthenticatedIncomplete {
            self.say("Saved. Your profile still needs a username and an avatar.");
        } else {
            self.say("Profile saved.");
        }
        Ok(())
    }

    async fn show_profile(&mut self) -> Result<(), ServiceError> {
        let session = self.session()?;
        if self.gate.state() == GateState::AuthenticatedIncomplete {
            if !self.enter(Screen::Setup) {
                return Ok(());
            }
            let current = self.setup.current().await?;
            let username = current.and_then(|p| p.username).unwrap_or_default();
            self.say(format!("Finish setup: setup <username> [avatar-url] (suggested username: {username})"));
            return Ok(());
        }
        if !self.enter(Screen::Profile) {
            return Ok(());
        }
        let profile = self.profile.load(session.user_id).await?;
        self.say(format!("username: {}", profile.username.unwrap_or_default()));
        self.say(format!("avatar:   {}", profile.avatar_url.unwrap_or_default()));
        self.say(format!("email:    {}", session.email));
        Ok(())
    }

    async fn update_profile(&mut self, username: &str, avatar_path: Option<&str>) -> Result<(), ServiceError> {
        let session = self.session()?;
        if !self.enter(Screen::Profile) {
            return Ok(());
        }
        let avatar = match avatar_path {
            Some(path) => match read_image(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    self.say(format!("Could not read {path}: {e}"));
                    return Ok(());
                }
            },
            None => None,
        };
        let profile = self.profile.update(session.user_id, username, avatar).await?;
        self.say(format!(
            "Profile updated: {} {}",
            profile.username.unwrap_or_default(),
            profile.avatar_url.unwrap_or_default()
        ));
        Ok(())
    }

    // =========================================================================
    // CHATS
    // =========================================================================

    async fn list_chats(&mut self) -> Result<(), ServiceError> {
        let session = self.session()?;
        self.leave_room();
        if !self.enter(Screen::Main) {
            return Ok(());
        }
        self.listing = self.chats.list(session.user_id).await?;
        if self.listing.is_empty() {
            self.say("No chats yet.");
            return Ok(());
        }
        let rows: Vec<String> = self
            .listing
            .iter()
            .enumerate()
            .map(|(i, row)| format!("{:>3}. {} <{}> {}", i + 1, row.display_name(), row.avatar_url(), row.chat.id))
            .collect();
        for row in rows {
            self.say(row);
        }
        Ok(())
    }

    fn resolve_chat(&self, target: ChatRef) -> Option<Uuid> {
        match target {
            ChatRef::Id(id) => Some(id),
            ChatRef::Index(i) => self.listing.get(i).map(|row| row.chat.id),
        }
    }

    async fn open_chat(&mut self, target: ChatRef) -> Result<(), ServiceError> {
        let session = self.session()?;
        let Some(chat_id) = self.resolve_chat(target) else {
            self.say("No such chat. Run `chats` first.");
            return Ok(());
        };
        self.room = None;
        if !self.enter(Screen::ChatRoom(chat_id)) {
            return Ok(());
        }
        let room = ChatRoom::open(&self.backend, self.config.buckets.chat_images.clone(), session, chat_id).await?;
        let history: Vec<Message> = room.messages().to_vec();
        self.room = Some(room);
        if history.is_empty() {
            self.say("No messages yet.");
        }
        for message in &history {
            self.render_message(message);
        }
        Ok(())
    }

    fn leave_room(&mut self) {
        if self.room.take().is_some() {
            self.gate.navigate(Screen::Main);
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<(), ServiceError> {
        let Some(room) = &self.room else {
            self.say("Open a chat first.");
            return Ok(());
        };
        room.send_text(text).await?;
        Ok(())
    }

    async fn send_image(&mut self, path: &str) -> Result<(), ServiceError> {
        if self.room.is_none() {
            self.say("Open a chat first.");
            return Ok(());
        }
        let file = match read_image(path).await {
            Ok(file) => file,
            Err(e) => {
                self.say(format!("Could not read {path}: {e}"));
                return Ok(());
            }
        };
        if let Some(room) = &self.room {
            room.send_image(file).await?;
        }
        Ok(())
    }

    fn go(&mut self, screen: Screen) {
        if !matches!(screen, Screen::ChatRoom(_)) {
            self.room = None;
        }
        self.enter(screen);
    }
}

async fn next_message(room: &mut Option<ChatRoom>) -> Option<Message> {
    match room {
        Some(room) => room.next_incoming().await,
        None => std::future::pending().await,
    }
}

async fn read_image(path: &str) -> std::io::Result<ImageFile> {
    let bytes = tokio::fs::read(path).await?;
    let name = Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |n| n.to_string_lossy().into_owned());
    let content_type = content_type_for(&name).to_owned();
    Ok(ImageFile { name, bytes, content_type })
}

fn state_label(state: GateState) -> &'static str {
    match state {
        GateState::Unauthenticated => "signed out",
        GateState::Loading => "loading",
        GateState::AuthenticatedIncomplete => "profile incomplete",
        GateState::AuthenticatedComplete => "ready",
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
