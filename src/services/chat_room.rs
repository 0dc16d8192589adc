//! Chat room screen: history, live feed, and sending.
//!
//! DESIGN
//! ======
//! The insert feed is subscribed before history is loaded so no row falls
//! in the gap; rows seen twice (history and feed, or our own echo) are
//! dropped by id.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::upload::{chat_image_path, unix_millis};
use super::{ServiceError, ValidationError};
use crate::backend::{Backend, BlobStore, MessageStore, Subscription, UploadOptions};
use crate::types::{ImageFile, Message, NewMessage, Session};

pub struct ChatRoom {
    store: Arc<dyn MessageStore>,
    blobs: Arc<dyn BlobStore>,
    bucket: String,
    session: Session,
    chat_id: Uuid,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    feed: Subscription<Message>,
}

impl ChatRoom {
    /// Subscribe to `chat_id` and load its history.
    pub async fn open(
        backend: &Backend,
        image_bucket: impl Into<String>,
        session: Session,
        chat_id: Uuid,
    ) -> Result<Self, ServiceError> {
        let feed = backend.messages.subscribe_new_messages(chat_id).await?;
        let history = backend.messages.list_messages(chat_id).await?;
        let mut room = Self {
            store: backend.messages.clone(),
            blobs: backend.blobs.clone(),
            bucket: image_bucket.into(),
            session,
            chat_id,
            messages: Vec::with_capacity(history.len()),
            seen: HashSet::new(),
            feed,
        };
        for message in history {
            room.apply(message);
        }
        debug!(%chat_id, count = room.messages.len(), "chat room opened");
        Ok(room)
    }

    #[must_use]
    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    /// Messages in display order, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn is_mine(&self, message: &Message) -> bool {
        message.sender == self.session.email
    }

    /// Append a row. Returns `false` for duplicates and other chats' rows.
    pub fn apply(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id || !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Wait for the next new row and append it. `None` once the feed closes.
    pub async fn next_incoming(&mut self) -> Option<Message> {
        while let Some(message) = self.feed.recv().await {
            if self.apply(message.clone()) {
                return Some(message);
            }
        }
        None
    }

    /// Append every row already waiting on the feed. Returns how many were new.
    pub fn drain_incoming(&mut self) -> usize {
        let mut added = 0;
        while let Some(message) = self.feed.try_recv() {
            if self.apply(message) {
                added += 1;
            }
        }
        added
    }

    /// Send a text message. Blank input is ignored and returns `false`.
    pub async fn send_text(&self, content: &str) -> Result<bool, ServiceError> {
        if content.trim().is_empty() {
            return Ok(false);
        }
        let message = NewMessage::text(self.chat_id, &self.session.email, content);
        self.store.insert_message(&message).await?;
        Ok(true)
    }

    /// Upload an image and post it as a message. Returns its public URL.
    pub async fn send_image(&self, file: ImageFile) -> Result<String, ServiceError> {
        if file.bytes.is_empty() {
            return Err(ValidationError::EmptyFile.into());
        }
        let path = chat_image_path(&self.session.email, &file.name, unix_millis());
        let options = UploadOptions { content_type: Some(file.content_type), upsert: false };
        self.blobs
            .upload(&self.bucket, &path, file.bytes, options)
            .await?;
        let image_url = self.blobs.public_url(&self.bucket, &path);

        let message = NewMessage::image(self.chat_id, &self.session.email, &image_url);
        self.store.insert_message(&message).await?;
        info!(chat_id = %self.chat_id, %path, "image message sent");
        Ok(image_url)
    }
}

#[cfg(test)]
#[path = "chat_room_test.rs"]
mod tests;
