//! Cascade handlers run by `comment-group`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ripple_events::{CascadeEvent, CascadeHandler, EventEnvelope, EventKind, HandlerError};

use super::CommentStore;

/// `PostDeleted` → delete the post's comments and replies.
pub struct PurgePostComments {
    store: Arc<dyn CommentStore>,
}

impl PurgePostComments {
    pub fn new(store: Arc<dyn CommentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CascadeHandler for PurgePostComments {
    fn name(&self) -> &'static str {
        "comment.purge_post_comments"
    }

    fn kind(&self) -> EventKind {
        EventKind::PostDeleted
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::PostDeleted(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };
        let removed = self.store.delete_by_post(ev.post_id).await?;
        debug!(post_id = %ev.post_id, removed, "purged comments of deleted post");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ripple_core::{PostId, UserId};
    use ripple_events::{topics, EntryId};

    use super::*;
    use crate::comment::{InMemoryCommentStore, NewComment};

    #[tokio::test]
    async fn removes_comments_and_replies_of_the_post_only() {
        let store = Arc::new(InMemoryCommentStore::new());
        let mk = |post: i64, parent| NewComment {
            post_id: PostId::new(post),
            author_id: UserId::new(1),
            parent_id: parent,
            body: "hi".into(),
        };
        let top = store.insert(mk(5, None)).await.unwrap();
        store.insert(mk(5, Some(top.id))).await.unwrap();
        store.insert(mk(6, None)).await.unwrap();

        let handler = PurgePostComments::new(store.clone());
        let env = EventEnvelope::new(
            topics::POST_EVENTS,
            EntryId::new(1, 0),
            CascadeEvent::post_deleted(PostId::new(5)),
        );
        handler.handle(&env).await.unwrap();
        handler.handle(&env).await.unwrap();

        assert!(store.list_by_post(PostId::new(5)).await.unwrap().is_empty());
        assert_eq!(store.list_by_post(PostId::new(6)).await.unwrap().len(), 1);
    }
}
