//! Line parser for shell commands.

use uuid::Uuid;

use crate::gate::Screen;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`; type `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// A chat picked from the last listing by position, or by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRef {
    Index(usize),
    Id(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Signup { email: String, password: String },
    OAuth,
    Callback { url: String },
    Logout,
    Setup { username: String, avatar_url: String },
    ShowProfile,
    SetProfile { username: String, avatar_path: Option<String> },
    Chats,
    Open(ChatRef),
    Back,
    Send { text: String },
    Image { path: String },
    Go(Screen),
    Retry,
    WhoAmI,
    Help,
    Quit,
}

pub const HELP: &str = "\
login <email> <password>        sign in with email and password
signup <email> <password>       create an account
oauth                           print the OAuth sign-in URL
callback <url>                  finish OAuth with the redirect URL
logout                          sign out
setup <username> [avatar-url]   complete your profile
profile                         show your profile
profile set <username> [file]   change username and optionally the avatar
chats                           list your chats
open <n|chat-id>                open a chat from the list
back                            leave the open chat
send <text>                     send a message to the open chat
image <file>                    send an image to the open chat
go <main|profile|setup|login>   switch screen
retry                           re-check your profile after a failed lookup
whoami                          show session and gate state
help                            this text
quit                            exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    let Some((head, rest)) = split_word(line) else {
        return Ok(None);
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "login" | "signin" => {
            let [email, password] = args[..] else { return Err(CommandError::Usage("login <email> <password>")) };
            Command::Login { email: email.to_owned(), password: password.to_owned() }
        }
        "signup" | "register" => {
            let [email, password] = args[..] else { return Err(CommandError::Usage("signup <email> <password>")) };
            Command::Signup { email: email.to_owned(), password: password.to_owned() }
        }
        "oauth" => Command::OAuth,
        "callback" => {
            let [url] = args[..] else { return Err(CommandError::Usage("callback <url>")) };
            Command::Callback { url: url.to_owned() }
        }
        "logout" | "signout" => Command::Logout,
        "setup" => {
            let (username, avatar_url) = match args[..] {
                [username] => (username, ""),
                [username, avatar_url] => (username, avatar_url),
                _ => return Err(CommandError::Usage("setup <username> [avatar-url]")),
            };
            Command::Setup { username: username.to_owned(), avatar_url: avatar_url.to_owned() }
        }
        "profile" => match args[..] {
            [] => Command::ShowProfile,
            ["set", username] => Command::SetProfile { username: username.to_owned(), avatar_path: None },
            ["set", username, path] => {
                Command::SetProfile { username: username.to_owned(), avatar_path: Some(path.to_owned()) }
            }
            _ => return Err(CommandError::Usage("profile | profile set <username> [file]")),
        },
        "chats" | "ls" => Command::Chats,
        "open" => {
            let [target] = args[..] else { return Err(CommandError::Usage("open <n|chat-id>")) };
            Command::Open(parse_chat_ref(target).ok_or(CommandError::Usage("open <n|chat-id>"))?)
        }
        "back" => Command::Back,
        "send" | "say" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("send <text>"));
            }
            Command::Send { text: rest.to_owned() }
        }
        "image" | "img" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("image <file>"));
            }
            Command::Image { path: rest.to_owned() }
        }
        "go" => {
            let [name] = args[..] else { return Err(CommandError::Usage("go <main|profile|setup|login>")) };
            Command::Go(parse_screen(name).ok_or(CommandError::Usage("go <main|profile|setup|login>"))?)
        }
        "retry" | "refresh" => Command::Retry,
        "whoami" => Command::WhoAmI,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_owned())),
    };
    Ok(Some(command))
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => Some((head, rest.trim())),
        None => Some((line, "")),
    }
}

/// Positions are 1-based as printed by `chats`.
fn parse_chat_ref(raw: &str) -> Option<ChatRef> {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Some(ChatRef::Id(id));
    }
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(ChatRef::Index(n - 1)),
        _ => None,
    }
}

fn parse_screen(name: &str) -> Option<Screen> {
    match name.to_ascii_lowercase().as_str() {
        "main" | "chats" | "home" => Some(Screen::Main),
        "profile" => Some(Screen::Profile),
        "setup" => Some(Screen::Setup),
        "login" => Some(Screen::Login),
        _ => None,
    }
}

#[cfg(test)]
#[path = "command_test.rs"]
mod tests;
