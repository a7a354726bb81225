use async_trait::async_trait;
use chrono::Utc;

use ripple_core::{CommentId, PostId, StoreError};

use super::{Comment, CommentStore, NewComment};
use crate::table::Table;

/// In-memory comment store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCommentStore {
    comments: Table<Comment>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let mut table = self.comments.write()?;
        let id = table.allocate();
        let row = Comment {
            id: CommentId::new(id),
            post_id: comment.post_id,
            author_id: comment.author_id,
            parent_id: comment.parent_id,
            body: comment.body,
            created_at: Utc::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        Ok(self.comments.read()?.rows.get(&id.get()).cloned())
    }

    async fn delete_by_post(&self, post: PostId) -> Result<u64, StoreError> {
        let mut table = self.comments.write()?;
        let before = table.rows.len();
        table.rows.retain(|_, c| c.post_id != post);
        Ok((before - table.rows.len()) as u64)
    }

    async fn list_by_post(&self, post: PostId) -> Result<Vec<Comment>, StoreError> {
        Ok(self
            .comments
            .read()?
            .rows
            .values()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }
}
