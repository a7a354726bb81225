//! Cascade handlers run by `media-group` (on `user-events` and `post-events`).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ripple_events::{CascadeEvent, CascadeHandler, EventEnvelope, EventKind, HandlerError};

use super::MediaStore;
use crate::DEFAULT_AVATAR_URL;

/// `UserCreated` → create the default avatar record, unless one exists.
pub struct CreateDefaultAvatar {
    store: Arc<dyn MediaStore>,
}

impl CreateDefaultAvatar {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CascadeHandler for CreateDefaultAvatar {
    fn name(&self) -> &'static str {
        "media.create_default_avatar"
    }

    fn kind(&self) -> EventKind {
        EventKind::UserCreated
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::UserCreated(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };
        match self
            .store
            .create_avatar_if_absent(ev.user_id, DEFAULT_AVATAR_URL)
            .await?
        {
            Some(avatar) => debug!(user_id = %ev.user_id, avatar_id = %avatar.id, "default avatar created"),
            None => debug!(user_id = %ev.user_id, "avatar already exists"),
        }
        Ok(())
    }
}

/// `UserDeleted` → delete the user's avatar record.
pub struct RemoveAvatar {
    store: Arc<dyn MediaStore>,
}

impl RemoveAvatar {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CascadeHandler for RemoveAvatar {
    fn name(&self) -> &'static str {
        "media.remove_avatar"
    }

    fn kind(&self) -> EventKind {
        EventKind::UserDeleted
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::UserDeleted(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };
        let removed = self.store.delete_avatar(ev.user_id).await?;
        debug!(user_id = %ev.user_id, removed, "avatar removed");
        Ok(())
    }
}

/// `PostDeleted` → delete the post's media rows.
pub struct PurgePostMedia {
    store: Arc<dyn MediaStore>,
}

impl PurgePostMedia {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CascadeHandler for PurgePostMedia {
    fn name(&self) -> &'static str {
        "media.purge_post_media"
    }

    fn kind(&self) -> EventKind {
        EventKind::PostDeleted
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::PostDeleted(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };
        let removed = self.store.delete_media_by_post(ev.post_id).await?;
        debug!(post_id = %ev.post_id, removed, "purged media of deleted post");
        Ok(())
    }
}
