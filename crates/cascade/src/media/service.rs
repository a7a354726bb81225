//! Request-side operations of the media service.

use std::sync::Arc;

use tracing::info;

use ripple_core::{DomainError, PostId, UserId};
use ripple_events::{CascadeEvent, Publisher};

use super::{Avatar, Media, MediaStore, NewMedia};
use crate::error::ServiceError;
use crate::DEFAULT_AVATAR_URL;

pub struct MediaService {
    store: Arc<dyn MediaStore>,
    publisher: Publisher,
}

impl MediaService {
    pub fn new(store: Arc<dyn MediaStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Attach a file to a post.
    pub async fn attach(&self, media: NewMedia) -> Result<Media, ServiceError> {
        if media.url.trim().is_empty() {
            return Err(DomainError::validation("media url must not be empty").into());
        }
        Ok(self.store.insert_media(media).await?)
    }

    pub async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Media>, ServiceError> {
        Ok(self.store.list_media_by_post(post_id).await?)
    }

    pub async fn avatar(&self, owner: UserId) -> Result<Avatar, ServiceError> {
        self.store
            .avatar(owner)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("avatar of user {owner}")).into())
    }

    /// Point the owner's avatar at `url`, then publish `AvatarUpdated`.
    pub async fn update_avatar(&self, owner: UserId, url: impl Into<String>) -> Result<Avatar, ServiceError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(DomainError::validation("avatar url must not be empty").into());
        }
        self.set_avatar(owner, url).await
    }

    /// Put the default avatar back, then publish `AvatarUpdated`.
    pub async fn reset_avatar(&self, owner: UserId) -> Result<Avatar, ServiceError> {
        self.set_avatar(owner, DEFAULT_AVATAR_URL.to_string()).await
    }

    async fn set_avatar(&self, owner: UserId, url: String) -> Result<Avatar, ServiceError> {
        let avatar = self
            .store
            .set_avatar_url(owner, &url)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("avatar of user {owner}")))?;

        self.publisher
            .publish(&CascadeEvent::avatar_updated(owner, url))
            .await?;
        info!(user_id = %owner, url = %avatar.url, "avatar updated");
        Ok(avatar)
    }
}
