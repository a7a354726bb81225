//! User service: owns users; mirrors the avatar url onto `image_url`.

pub mod handlers;
pub mod memory;
pub mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ripple_core::{StoreError, UserId};

pub use handlers::SyncAvatarUrl;
pub use memory::InMemoryUserStore;
pub use service::UserService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

/// Private store of the user service.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. `None` if the username is taken.
    async fn insert(&self, user: NewUser, image_url: &str) -> Result<Option<User>, StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// `false` if there was no such user.
    async fn delete(&self, id: UserId) -> Result<bool, StoreError>;

    /// Set the user's image url. `None` if there is no such user.
    async fn set_image_url(&self, id: UserId, url: &str) -> Result<Option<User>, StoreError>;
}
