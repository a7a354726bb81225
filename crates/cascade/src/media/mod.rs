//! Media service: owns post media and one avatar record per user.

pub mod handlers;
pub mod memory;
pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ripple_core::{AvatarId, DomainError, MediaId, PostId, StoreError, UserId};

pub use handlers::{CreateDefaultAvatar, PurgePostMedia, RemoveAvatar};
pub use memory::InMemoryMediaStore;
pub use service::MediaService;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl core::str::FromStr for MediaType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(DomainError::validation(format!("unknown media type '{other}'"))),
        }
    }
}

/// A file attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub post_id: PostId,
    pub owner_id: UserId,
    pub media_type: MediaType,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedia {
    pub post_id: PostId,
    pub owner_id: UserId,
    pub media_type: MediaType,
    pub url: String,
}

/// The avatar record of one user (at most one per owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: AvatarId,
    pub owner_id: UserId,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// Private store of the media service.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert_media(&self, media: NewMedia) -> Result<Media, StoreError>;

    async fn list_media_by_post(&self, post: PostId) -> Result<Vec<Media>, StoreError>;

    /// Delete every media row of `post`; returns how many went away.
    async fn delete_media_by_post(&self, post: PostId) -> Result<u64, StoreError>;

    async fn avatar(&self, owner: UserId) -> Result<Option<Avatar>, StoreError>;

    /// Create the owner's avatar record unless one exists. `None` means a
    /// record was already there and nothing changed.
    async fn create_avatar_if_absent(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError>;

    /// `None` if the owner has no avatar record.
    async fn set_avatar_url(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError>;

    /// `false` if the owner had no avatar record.
    async fn delete_avatar(&self, owner: UserId) -> Result<bool, StoreError>;
}
