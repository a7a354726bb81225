//! Request-side operations of the post service.

use std::sync::Arc;

use tracing::info;

use ripple_core::{DomainError, PostId, UserId};
use ripple_events::{CascadeEvent, Publisher};

use super::{NewPost, Post, PostStore};
use crate::error::ServiceError;

pub struct PostService {
    store: Arc<dyn PostStore>,
    publisher: Publisher,
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    pub async fn create(&self, post: NewPost) -> Result<Post, ServiceError> {
        if post.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty").into());
        }
        Ok(self.store.insert(post).await?)
    }

    pub async fn get(&self, id: PostId) -> Result<Post, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("post {id}")).into())
    }

    pub async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Post>, ServiceError> {
        Ok(self.store.list_by_owner(owner).await?)
    }

    /// Delete the post, then publish `PostDeleted`.
    pub async fn delete(&self, id: PostId) -> Result<(), ServiceError> {
        if !self.store.delete(id).await? {
            return Err(DomainError::not_found(format!("post {id}")).into());
        }
        self.publisher
            .publish(&CascadeEvent::post_deleted(id))
            .await?;
        info!(post_id = %id, "post deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ripple_events::{topics, InMemoryStream};

    use super::*;
    use crate::post::InMemoryPostStore;

    #[tokio::test]
    async fn delete_publishes_post_deleted() {
        let stream = Arc::new(InMemoryStream::new());
        let svc = PostService::new(Arc::new(InMemoryPostStore::new()), Publisher::new(stream.clone()));
        let post = svc
            .create(NewPost {
                owner_id: UserId::new(1),
                title: "hello".into(),
                body: "world".into(),
            })
            .await
            .unwrap();

        svc.delete(post.id).await.unwrap();

        let entries = stream.entries(topics::POST_EVENTS);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields.get("post_id").map(String::as_str), Some("1"));
        assert!(matches!(
            svc.get(post.id).await,
            Err(ServiceError::Domain(DomainError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn deleting_a_missing_post_publishes_nothing() {
        let stream = Arc::new(InMemoryStream::new());
        let svc = PostService::new(Arc::new(InMemoryPostStore::new()), Publisher::new(stream.clone()));
        assert!(svc.delete(PostId::new(9)).await.is_err());
        assert!(stream.entries(topics::POST_EVENTS).is_empty());
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let svc = PostService::new(
            Arc::new(InMemoryPostStore::new()),
            Publisher::new(Arc::new(InMemoryStream::new())),
        );
        let err = svc
            .create(NewPost {
                owner_id: UserId::new(1),
                title: "".into(),
                body: "b".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
    }
}
