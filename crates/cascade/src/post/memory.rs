use async_trait::async_trait;
use chrono::Utc;

use ripple_core::{PostId, StoreError, UserId};

use super::{NewPost, Post, PostStore};
use crate::table::Table;

/// In-memory post store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPostStore {
    posts: Table<Post>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn insert(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut table = self.posts.write()?;
        let id = table.allocate();
        let row = Post {
            id: PostId::new(id),
            owner_id: post.owner_id,
            title: post.title,
            body: post.body,
            created_at: Utc::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        Ok(self.posts.read()?.rows.get(&id.get()).cloned())
    }

    async fn delete(&self, id: PostId) -> Result<bool, StoreError> {
        Ok(self.posts.write()?.rows.remove(&id.get()).is_some())
    }

    async fn delete_by_owner(&self, owner: UserId) -> Result<Vec<PostId>, StoreError> {
        let mut table = self.posts.write()?;
        let ids: Vec<i64> = table
            .rows
            .values()
            .filter(|p| p.owner_id == owner)
            .map(|p| p.id.get())
            .collect();
        for id in &ids {
            table.rows.remove(id);
        }
        Ok(ids.into_iter().map(PostId::new).collect())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Post>, StoreError> {
        Ok(self
            .posts
            .read()?
            .rows
            .values()
            .filter(|p| p.owner_id == owner)
            .cloned()
            .collect())
    }
}
