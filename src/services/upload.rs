//! Object paths for uploaded images.

use time::OffsetDateTime;
use uuid::Uuid;

/// Extension of `file_name`: the text after the last `.`, or the whole name
/// when there is no dot.
#[must_use]
pub fn extension(file_name: &str) -> &str {
    file_name.rsplit('.').next().unwrap_or(file_name)
}

/// `{user_id}.{ext}` in the avatar bucket; re-uploads replace it.
#[must_use]
pub fn avatar_path(user_id: Uuid, file_name: &str) -> String {
    format!("{user_id}.{}", extension(file_name))
}

/// `{sender}/{millis}.{ext}` in the chat image bucket.
#[must_use]
pub fn chat_image_path(sender: &str, file_name: &str, unix_millis: i128) -> String {
    format!("{sender}/{unix_millis}.{}", extension(file_name))
}

#[must_use]
pub fn unix_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// Guess a MIME type from the file extension.
#[must_use]
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
