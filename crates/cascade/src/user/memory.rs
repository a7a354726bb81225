use async_trait::async_trait;
use chrono::Utc;

use ripple_core::{StoreError, UserId};

use super::{NewUser, User, UserStore};
use crate::table::Table;

/// In-memory user store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: Table<User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: NewUser, image_url: &str) -> Result<Option<User>, StoreError> {
        let mut table = self.users.write()?;
        if table.rows.values().any(|u| u.username == user.username) {
            return Ok(None);
        }
        let id = table.allocate();
        let row = User {
            id: UserId::new(id),
            username: user.username,
            email: user.email,
            image_url: image_url.to_string(),
            created_at: Utc::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read()?.rows.get(&id.get()).cloned())
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.users.write()?.rows.remove(&id.get()).is_some())
    }

    async fn set_image_url(&self, id: UserId, url: &str) -> Result<Option<User>, StoreError> {
        let mut table = self.users.write()?;
        Ok(table.rows.get_mut(&id.get()).map(|user| {
            user.image_url = url.to_string();
            user.clone()
        }))
    }
}
