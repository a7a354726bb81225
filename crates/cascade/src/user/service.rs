//! Request-side operations of the user service.

use std::sync::Arc;

use tracing::info;

use ripple_core::{DomainError, UserId};
use ripple_events::{CascadeEvent, Publisher};

use super::{NewUser, User, UserStore};
use crate::error::ServiceError;
use crate::DEFAULT_AVATAR_URL;

pub struct UserService {
    store: Arc<dyn UserStore>,
    publisher: Publisher,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Create a user with the default image, then publish `UserCreated`.
    pub async fn register(&self, user: NewUser) -> Result<User, ServiceError> {
        validate(&user)?;
        let username = user.username.clone();
        let created = self
            .store
            .insert(user, DEFAULT_AVATAR_URL)
            .await?
            .ok_or_else(|| DomainError::conflict(format!("username '{username}' is taken")))?;

        self.publisher
            .publish(&CascadeEvent::user_created(created.id))
            .await?;
        info!(user_id = %created.id, "user registered");
        Ok(created)
    }

    pub async fn get(&self, id: UserId) -> Result<User, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {id}")).into())
    }

    /// Delete the user, then publish `UserDeleted`. Nothing is published for
    /// a user that does not exist.
    pub async fn delete(&self, id: UserId) -> Result<(), ServiceError> {
        if !self.store.delete(id).await? {
            return Err(DomainError::not_found(format!("user {id}")).into());
        }
        self.publisher
            .publish(&CascadeEvent::user_deleted(id))
            .await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }
}

fn validate(user: &NewUser) -> Result<(), DomainError> {
    if user.username.trim().is_empty() {
        return Err(DomainError::validation("username must not be empty"));
    }
    if !user.email.contains('@') {
        return Err(DomainError::validation(format!("invalid email '{}'", user.email)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ripple_events::{topics, CascadeEvent, Decoded, InMemoryStream};

    use super::*;
    use crate::user::InMemoryUserStore;

    fn service() -> (UserService, Arc<InMemoryStream>) {
        let stream = Arc::new(InMemoryStream::new());
        let svc = UserService::new(
            Arc::new(InMemoryUserStore::new()),
            Publisher::new(stream.clone()),
        );
        (svc, stream)
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
        }
    }

    fn published(stream: &InMemoryStream) -> Vec<CascadeEvent> {
        stream
            .entries(topics::USER_EVENTS)
            .iter()
            .filter_map(|e| match CascadeEvent::decode(&e.fields) {
                Ok(Decoded::Known(ev)) => Some(ev),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn register_publishes_user_created() {
        let (svc, stream) = service();
        let user = svc.register(new_user("grace")).await.unwrap();

        assert_eq!(user.image_url, DEFAULT_AVATAR_URL);
        assert_eq!(published(&stream), vec![CascadeEvent::user_created(user.id)]);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict_and_publishes_nothing() {
        let (svc, stream) = service();
        svc.register(new_user("grace")).await.unwrap();
        let err = svc.register(new_user("grace")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
        assert_eq!(published(&stream).len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let (svc, _) = service();
        let err = svc
            .register(NewUser {
                username: " ".into(),
                email: "x@example.com".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_publishes_user_deleted_once() {
        let (svc, stream) = service();
        let user = svc.register(new_user("linus")).await.unwrap();

        svc.delete(user.id).await.unwrap();
        let err = svc.delete(user.id).await.unwrap_err();

        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
        assert_eq!(
            published(&stream),
            vec![CascadeEvent::user_created(user.id), CascadeEvent::user_deleted(user.id)]
        );
    }
}
