use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use ripple_cascade::user::{NewUser, User, UserStore};
use ripple_core::{StoreError, UserId};

use super::{execute_all, store_error};

const SCHEMA: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS users (
        id          BIGSERIAL PRIMARY KEY,
        username    TEXT NOT NULL UNIQUE,
        email       TEXT NOT NULL,
        image_url   TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#];

/// Postgres user store.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        execute_all(&self.pool, SCHEMA).await
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        image_url: row.try_get("image_url")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser, image_url: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, email, image_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO NOTHING
            RETURNING id, username, email, image_url, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(image_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(user_from_row).transpose().map_err(store_error)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, email, image_url, created_at FROM users WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(user_from_row).transpose().map_err(store_error)
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_image_url(&self, id: UserId, url: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE users SET image_url = $2
            WHERE id = $1
            RETURNING id, username, email, image_url, created_at
            "#,
        )
        .bind(id.get())
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(user_from_row).transpose().map_err(store_error)
    }
}
