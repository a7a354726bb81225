use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use ripple_cascade::post::{NewPost, Post, PostStore};
use ripple_core::{PostId, StoreError, UserId};

use super::{execute_all, store_error};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id          BIGSERIAL PRIMARY KEY,
        owner_id    BIGINT NOT NULL,
        title       TEXT NOT NULL,
        body        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS posts_owner_id_idx ON posts (owner_id)",
];

const COLUMNS: &str = "id, owner_id, title, body, created_at";

/// Postgres post store.
#[derive(Debug, Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        execute_all(&self.pool, SCHEMA).await
    }
}

fn post_from_row(row: &PgRow) -> Result<Post, sqlx::Error> {
    Ok(Post {
        id: PostId::new(row.try_get("id")?),
        owner_id: UserId::new(row.try_get("owner_id")?),
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn insert(&self, post: NewPost) -> Result<Post, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO posts (owner_id, title, body) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
        ))
        .bind(post.owner_id.get())
        .bind(&post.title)
        .bind(&post.body)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        post_from_row(&row).map_err(store_error)
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM posts WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(post_from_row).transpose().map_err(store_error)
    }

    async fn delete(&self, id: PostId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner(&self, owner: UserId) -> Result<Vec<PostId>, StoreError> {
        let rows = sqlx::query("DELETE FROM posts WHERE owner_id = $1 RETURNING id")
            .bind(owner.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id").map(PostId::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM posts WHERE owner_id = $1 ORDER BY id"))
            .bind(owner.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter().map(post_from_row).collect::<Result<_, _>>().map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn delete_by_owner_returns_sorted_ids() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgPostStore::new(crate::store::connect(&url, 2).await.unwrap());
        store.ensure_schema().await.unwrap();

        let owner = UserId::new(i64::from(std::process::id()) + 1_000_000);
        let mut created = Vec::new();
        for title in ["a", "b"] {
            let post = store
                .insert(NewPost {
                    owner_id: owner,
                    title: title.into(),
                    body: String::new(),
                })
                .await
                .unwrap();
            created.push(post.id);
        }

        assert_eq!(store.delete_by_owner(owner).await.unwrap(), created);
        assert!(store.delete_by_owner(owner).await.unwrap().is_empty());
    }
}
