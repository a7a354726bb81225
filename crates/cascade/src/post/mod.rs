//! Post service: owns posts; purges a deleted user's posts and announces each.

pub mod handlers;
pub mod memory;
pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ripple_core::{PostId, StoreError, UserId};

pub use handlers::PurgeUserPosts;
pub use memory::InMemoryPostStore;
pub use service::PostService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub owner_id: UserId,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub owner_id: UserId,
    pub title: String,
    pub body: String,
}

/// Private store of the post service.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: NewPost) -> Result<Post, StoreError>;

    async fn get(&self, id: PostId) -> Result<Option<Post>, StoreError>;

    /// `false` if there was no such post.
    async fn delete(&self, id: PostId) -> Result<bool, StoreError>;

    /// Delete every post of `owner` in one transaction; returns the deleted
    /// ids in ascending order.
    async fn delete_by_owner(&self, owner: UserId) -> Result<Vec<PostId>, StoreError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Post>, StoreError>;
}
