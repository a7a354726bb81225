//! Cascade handlers run by `user-group`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use ripple_events::{CascadeEvent, CascadeHandler, EventEnvelope, EventKind, HandlerError};

use super::UserStore;

/// `AvatarUpdated` → copy the url onto the user record.
///
/// Setting the same url twice is a no-op. An avatar event for a user that no
/// longer exists is acknowledged without effect: the user was deleted after
/// the avatar changed and there is nothing left to update.
pub struct SyncAvatarUrl {
    store: Arc<dyn UserStore>,
}

impl SyncAvatarUrl {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CascadeHandler for SyncAvatarUrl {
    fn name(&self) -> &'static str {
        "user.sync_avatar_url"
    }

    fn kind(&self) -> EventKind {
        EventKind::AvatarUpdated
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let CascadeEvent::AvatarUpdated(ev) = envelope.event() else {
            return Err(HandlerError::unexpected(self.name(), envelope));
        };

        match self.store.set_image_url(ev.user_id, &ev.url).await? {
            Some(_) => debug!(user_id = %ev.user_id, url = %ev.url, "user image url updated"),
            None => warn!(user_id = %ev.user_id, "avatar updated for unknown user; ignoring"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ripple_core::UserId;
    use ripple_events::EntryId;

    use super::*;
    use crate::user::{InMemoryUserStore, NewUser};

    fn envelope(event: CascadeEvent) -> EventEnvelope {
        EventEnvelope::new(event.topic(), EntryId::new(1, 0), event)
    }

    #[tokio::test]
    async fn copies_url_and_is_idempotent() {
        let store = Arc::new(InMemoryUserStore::new());
        let user = store
            .insert(
                NewUser {
                    username: "ada".into(),
                    email: "ada@example.com".into(),
                },
                crate::DEFAULT_AVATAR_URL,
            )
            .await
            .unwrap()
            .unwrap();

        let handler = SyncAvatarUrl::new(store.clone());
        let env = envelope(CascadeEvent::avatar_updated(user.id, "ada.png"));
        handler.handle(&env).await.unwrap();
        handler.handle(&env).await.unwrap();

        assert_eq!(store.get(user.id).await.unwrap().unwrap().image_url, "ada.png");
    }

    #[tokio::test]
    async fn unknown_user_is_not_an_error() {
        let handler = SyncAvatarUrl::new(Arc::new(InMemoryUserStore::new()));
        let env = envelope(CascadeEvent::avatar_updated(UserId::new(404), "x.png"));
        handler.handle(&env).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_other_kinds() {
        let handler = SyncAvatarUrl::new(Arc::new(InMemoryUserStore::new()));
        let env = envelope(CascadeEvent::user_deleted(UserId::new(1)));
        assert!(matches!(
            handler.handle(&env).await,
            Err(HandlerError::UnexpectedKind { .. })
        ));
    }
}
