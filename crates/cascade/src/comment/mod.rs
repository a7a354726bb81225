//! Comment service: owns comments and replies; purges them with their post.

pub mod handlers;
pub mod memory;
pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ripple_core::{CommentId, PostId, StoreError, UserId};

pub use handlers::PurgePostComments;
pub use memory::InMemoryCommentStore;
pub use service::CommentService;

/// A top-level comment (`parent_id = None`) or a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub body: String,
}

/// Private store of the comment service.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError>;

    async fn get(&self, id: CommentId) -> Result<Option<Comment>, StoreError>;

    /// Delete every comment and reply on `post` in one transaction; returns
    /// how many rows went away.
    async fn delete_by_post(&self, post: PostId) -> Result<u64, StoreError>;

    /// Comments and replies on `post`, oldest first.
    async fn list_by_post(&self, post: PostId) -> Result<Vec<Comment>, StoreError>;
}
