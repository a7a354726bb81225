use async_trait::async_trait;
use chrono::Utc;

use ripple_core::{AvatarId, MediaId, PostId, StoreError, UserId};

use super::{Avatar, Media, MediaStore, NewMedia};
use crate::table::Table;

/// In-memory media store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMediaStore {
    media: Table<Media>,
    avatars: Table<Avatar>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn insert_media(&self, media: NewMedia) -> Result<Media, StoreError> {
        let mut table = self.media.write()?;
        let id = table.allocate();
        let row = Media {
            id: MediaId::new(id),
            post_id: media.post_id,
            owner_id: media.owner_id,
            media_type: media.media_type,
            url: media.url,
            created_at: Utc::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn list_media_by_post(&self, post: PostId) -> Result<Vec<Media>, StoreError> {
        Ok(self
            .media
            .read()?
            .rows
            .values()
            .filter(|m| m.post_id == post)
            .cloned()
            .collect())
    }

    async fn delete_media_by_post(&self, post: PostId) -> Result<u64, StoreError> {
        let mut table = self.media.write()?;
        let before = table.rows.len();
        table.rows.retain(|_, m| m.post_id != post);
        Ok((before - table.rows.len()) as u64)
    }

    async fn avatar(&self, owner: UserId) -> Result<Option<Avatar>, StoreError> {
        Ok(self
            .avatars
            .read()?
            .rows
            .values()
            .find(|a| a.owner_id == owner)
            .cloned())
    }

    async fn create_avatar_if_absent(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError> {
        let mut table = self.avatars.write()?;
        if table.rows.values().any(|a| a.owner_id == owner) {
            return Ok(None);
        }
        let id = table.allocate();
        let row = Avatar {
            id: AvatarId::new(id),
            owner_id: owner,
            url: url.to_string(),
            updated_at: Utc::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn set_avatar_url(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError> {
        let mut table = self.avatars.write()?;
        Ok(table.rows.values_mut().find(|a| a.owner_id == owner).map(|avatar| {
            avatar.url = url.to_string();
            avatar.updated_at = Utc::now();
            avatar.clone()
        }))
    }

    async fn delete_avatar(&self, owner: UserId) -> Result<bool, StoreError> {
        let mut table = self.avatars.write()?;
        let before = table.rows.len();
        table.rows.retain(|_, a| a.owner_id != owner);
        Ok(table.rows.len() != before)
    }
}
