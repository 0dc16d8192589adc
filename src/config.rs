//! Configuration parsed from environment variables.
//!
//! Two layers: [`AppConfig`] covers client behavior and is always present
//! (every value has a default), while [`SupabaseConfig`] holds the hosted
//! project credentials and is only required by the Supabase backend.

pub const DEFAULT_OAUTH_PROVIDER: &str = "google";
pub const DEFAULT_AVATAR_BUCKET: &str = "avatars";
pub const DEFAULT_CHAT_IMAGE_BUCKET: &str = "chat-images";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("config parse failed: {0}")]
    Parse(String),
}

/// Login methods the login screen offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMethods {
    /// Email + password sign-in and sign-up.
    pub password: bool,
    /// Third-party OAuth redirect.
    pub oauth: bool,
}

impl Default for AuthMethods {
    fn default() -> Self {
        Self { password: true, oauth: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    pub avatars: String,
    pub chat_images: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self { avatars: DEFAULT_AVATAR_BUCKET.to_owned(), chat_images: DEFAULT_CHAT_IMAGE_BUCKET.to_owned() }
    }
}

/// Client-side settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub auth_methods: AuthMethods,
    pub oauth_provider: String,
    pub oauth_redirect_url: Option<String>,
    pub buckets: Buckets,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_methods: AuthMethods::default(),
            oauth_provider: DEFAULT_OAUTH_PROVIDER.to_owned(),
            oauth_redirect_url: None,
            buckets: Buckets::default(),
        }
    }
}

impl AppConfig {
    /// Build from environment variables.
    ///
    /// Optional:
    /// - `CHATGATE_AUTH_METHODS`: comma list of `password`, `oauth` (default both)
    /// - `CHATGATE_OAUTH_PROVIDER`: default `google`
    /// - `CHATGATE_OAUTH_REDIRECT_URL`: where the provider sends the user back
    /// - `CHATGATE_AVATAR_BUCKET`: default `avatars`
    /// - `CHATGATE_CHAT_IMAGE_BUCKET`: default `chat-images`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_methods = match lookup("CHATGATE_AUTH_METHODS") {
            Some(raw) => parse_auth_methods(&raw)?,
            None => AuthMethods::default(),
        };
        let oauth_provider = lookup("CHATGATE_OAUTH_PROVIDER")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OAUTH_PROVIDER.to_owned());
        let oauth_redirect_url = lookup("CHATGATE_OAUTH_REDIRECT_URL").filter(|v| !v.trim().is_empty());
        let buckets = Buckets {
            avatars: lookup("CHATGATE_AVATAR_BUCKET").unwrap_or_else(|| DEFAULT_AVATAR_BUCKET.to_owned()),
            chat_images: lookup("CHATGATE_CHAT_IMAGE_BUCKET").unwrap_or_else(|| DEFAULT_CHAT_IMAGE_BUCKET.to_owned()),
        };
        Ok(Self { auth_methods, oauth_provider, oauth_redirect_url, buckets })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Hosted project endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project base URL without trailing slash.
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: String,
    pub timeouts: Timeouts,
}

impl SupabaseConfig {
    /// Build from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `CHATGATE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `CHATGATE_CONNECT_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SUPABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing { var: "SUPABASE_URL" })?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Parse(format!("SUPABASE_URL must be http(s): {url}")));
        }
        let anon_key = lookup("SUPABASE_ANON_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing { var: "SUPABASE_ANON_KEY" })?;
        let timeouts = Timeouts {
            request_secs: parse_u64(&lookup, "CHATGATE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_u64(&lookup, "CHATGATE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { url: url.trim_end_matches('/').to_owned(), anon_key, timeouts })
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_auth_methods(raw: &str) -> Result<AuthMethods, ConfigError> {
    let mut methods = AuthMethods { password: false, oauth: false };
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item {
            "password" => methods.password = true,
            "oauth" => methods.oauth = true,
            other => return Err(ConfigError::Parse(format!("unknown auth method: {other}"))),
        }
    }
    if !methods.password && !methods.oauth {
        return Err(ConfigError::Parse("CHATGATE_AUTH_METHODS enables no login method".into()));
    }
    Ok(methods)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
