use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use ripple_cascade::media::{Avatar, Media, MediaStore, MediaType, NewMedia};
use ripple_core::{AvatarId, MediaId, PostId, StoreError, UserId};

use super::{execute_all, store_error};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS media (
        id          BIGSERIAL PRIMARY KEY,
        post_id     BIGINT NOT NULL,
        owner_id    BIGINT NOT NULL,
        media_type  TEXT NOT NULL CHECK (media_type IN ('image', 'video')),
        url         TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS media_post_id_idx ON media (post_id)",
    r#"
    CREATE TABLE IF NOT EXISTS avatars (
        id          BIGSERIAL PRIMARY KEY,
        owner_id    BIGINT NOT NULL UNIQUE,
        url         TEXT NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

const MEDIA_COLUMNS: &str = "id, post_id, owner_id, media_type, url, created_at";
const AVATAR_COLUMNS: &str = "id, owner_id, url, updated_at";

/// Postgres media store (post media and avatars).
#[derive(Debug, Clone)]
pub struct PgMediaStore {
    pool: PgPool,
}

impl PgMediaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        execute_all(&self.pool, SCHEMA).await
    }
}

fn media_from_row(row: &PgRow) -> Result<Media, StoreError> {
    let media_type: String = row.try_get("media_type").map_err(store_error)?;
    Ok(Media {
        id: MediaId::new(row.try_get("id").map_err(store_error)?),
        post_id: PostId::new(row.try_get("post_id").map_err(store_error)?),
        owner_id: UserId::new(row.try_get("owner_id").map_err(store_error)?),
        media_type: media_type
            .parse::<MediaType>()
            .map_err(|e| StoreError::query(e.to_string()))?,
        url: row.try_get("url").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
    })
}

fn avatar_from_row(row: &PgRow) -> Result<Avatar, sqlx::Error> {
    Ok(Avatar {
        id: AvatarId::new(row.try_get("id")?),
        owner_id: UserId::new(row.try_get("owner_id")?),
        url: row.try_get("url")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn insert_media(&self, media: NewMedia) -> Result<Media, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO media (post_id, owner_id, media_type, url) VALUES ($1, $2, $3, $4) RETURNING {MEDIA_COLUMNS}"
        ))
        .bind(media.post_id.get())
        .bind(media.owner_id.get())
        .bind(media.media_type.as_str())
        .bind(&media.url)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        media_from_row(&row)
    }

    async fn list_media_by_post(&self, post: PostId) -> Result<Vec<Media>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {MEDIA_COLUMNS} FROM media WHERE post_id = $1 ORDER BY id"))
            .bind(post.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter().map(media_from_row).collect()
    }

    async fn delete_media_by_post(&self, post: PostId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM media WHERE post_id = $1")
            .bind(post.get())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn avatar(&self, owner: UserId) -> Result<Option<Avatar>, StoreError> {
        let row = sqlx::query(&format!("SELECT {AVATAR_COLUMNS} FROM avatars WHERE owner_id = $1"))
            .bind(owner.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(avatar_from_row).transpose().map_err(store_error)
    }

    async fn create_avatar_if_absent(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO avatars (owner_id, url) VALUES ($1, $2) ON CONFLICT (owner_id) DO NOTHING RETURNING {AVATAR_COLUMNS}"
        ))
        .bind(owner.get())
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(avatar_from_row).transpose().map_err(store_error)
    }

    async fn set_avatar_url(&self, owner: UserId, url: &str) -> Result<Option<Avatar>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE avatars SET url = $2, updated_at = NOW() WHERE owner_id = $1 RETURNING {AVATAR_COLUMNS}"
        ))
        .bind(owner.get())
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(avatar_from_row).transpose().map_err(store_error)
    }

    async fn delete_avatar(&self, owner: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM avatars WHERE owner_id = $1")
            .bind(owner.get())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }
}
