//! Request-side operations of the comment service.
//!
//! Comments never publish: nothing downstream depends on them.

use std::sync::Arc;

use ripple_core::{CommentId, DomainError, PostId, UserId};

use super::{Comment, CommentStore, NewComment};
use crate::error::ServiceError;

pub struct CommentService {
    store: Arc<dyn CommentStore>,
}

impl CommentService {
    pub fn new(store: Arc<dyn CommentStore>) -> Self {
        Self { store }
    }

    pub async fn create_comment(
        &self,
        post_id: PostId,
        author_id: UserId,
        body: impl Into<String>,
    ) -> Result<Comment, ServiceError> {
        let body = non_empty(body.into())?;
        Ok(self
            .store
            .insert(NewComment {
                post_id,
                author_id,
                parent_id: None,
                body,
            })
            .await?)
    }

    /// Reply to `parent_id`, which must exist and belong to `post_id`.
    pub async fn reply(
        &self,
        post_id: PostId,
        parent_id: CommentId,
        author_id: UserId,
        body: impl Into<String>,
    ) -> Result<Comment, ServiceError> {
        let body = non_empty(body.into())?;
        let parent = self
            .store
            .get(parent_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("comment {parent_id}")))?;
        if parent.post_id != post_id {
            return Err(DomainError::validation(format!(
                "comment {parent_id} belongs to post {}, not {post_id}",
                parent.post_id
            ))
            .into());
        }
        Ok(self
            .store
            .insert(NewComment {
                post_id,
                author_id,
                parent_id: Some(parent_id),
                body,
            })
            .await?)
    }

    pub async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>, ServiceError> {
        Ok(self.store.list_by_post(post_id).await?)
    }
}

fn non_empty(body: String) -> Result<String, DomainError> {
    if body.trim().is_empty() {
        return Err(DomainError::validation("comment body must not be empty"));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::InMemoryCommentStore;

    fn service() -> CommentService {
        CommentService::new(Arc::new(InMemoryCommentStore::new()))
    }

    #[tokio::test]
    async fn reply_links_to_parent() {
        let svc = service();
        let top = svc.create_comment(PostId::new(1), UserId::new(2), "first").await.unwrap();
        let reply = svc.reply(PostId::new(1), top.id, UserId::new(3), "re").await.unwrap();

        assert_eq!(reply.parent_id, Some(top.id));
        assert_eq!(svc.list_by_post(PostId::new(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reply_to_missing_parent_is_not_found() {
        let err = service()
            .reply(PostId::new(1), CommentId::new(99), UserId::new(3), "re")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn reply_across_posts_is_rejected() {
        let svc = service();
        let top = svc.create_comment(PostId::new(1), UserId::new(2), "first").await.unwrap();
        let err = svc.reply(PostId::new(2), top.id, UserId::new(3), "re").await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
    }
}
