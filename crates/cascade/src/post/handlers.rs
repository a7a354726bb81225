//! Cascade handlers run by `post-group`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use ripple_events::{CascadeEvent, CascadeHandler, EventEnvelope, EventKind, HandlerError, Publisher};

use super::PostStore;

/// `UserDeleted` → delete the user's posts, then publish one `PostDeleted`
/// per deleted post.
///
/// Publishing starts only after the delete has committed. If a publish fails
/// the entry stays pending, but the posts are already gone: a redelivery
/// deletes nothing and the unpublished `PostDeleted` facts are lost.
pub struct PurgeUserPosts {
    store: Arc<dyn PostStore>,
    publisher: Publisher,
}

impl PurgeUserPosts {
    pub fn new(store: Arc<dyn PostStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl CascadeHandler for PurgeUserPosts {
    fn name(&self) -> &'static str {
        "post.purge_user_posts"
    }

    fn kind(&self) -> EventKind {
        EventKind::UserDeleted
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::UserDeleted(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };

        let deleted = self.store.delete_by_owner(ev.user_id).await?;
        if deleted.is_empty() {
            debug!(user_id = %ev.user_id, "no posts to purge");
            return Ok(());
        }
        info!(user_id = %ev.user_id, count = deleted.len(), "purged posts of deleted user");

        for post_id in deleted {
            self.publisher
                .publish(&CascadeEvent::post_deleted(post_id))
                .await?;
        }
        Ok(())
    }
}
