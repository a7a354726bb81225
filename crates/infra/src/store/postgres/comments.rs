use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use ripple_cascade::comment::{Comment, CommentStore, NewComment};
use ripple_core::{CommentId, PostId, StoreError, UserId};

use super::{execute_all, store_error};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id          BIGSERIAL PRIMARY KEY,
        post_id     BIGINT NOT NULL,
        author_id   BIGINT NOT NULL,
        parent_id   BIGINT NULL REFERENCES comments (id) ON DELETE CASCADE,
        body        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS comments_post_id_idx ON comments (post_id)",
];

const COLUMNS: &str = "id, post_id, author_id, parent_id, body, created_at";

/// Postgres comment store. Replies reference their parent and share its post.
#[derive(Debug, Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        execute_all(&self.pool, SCHEMA).await
    }
}

fn comment_from_row(row: &PgRow) -> Result<Comment, sqlx::Error> {
    Ok(Comment {
        id: CommentId::new(row.try_get("id")?),
        post_id: PostId::new(row.try_get("post_id")?),
        author_id: UserId::new(row.try_get("author_id")?),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(CommentId::new),
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn insert(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO comments (post_id, author_id, parent_id, body) VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
        ))
        .bind(comment.post_id.get())
        .bind(comment.author_id.get())
        .bind(comment.parent_id.map(|p| p.get()))
        .bind(&comment.body)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        comment_from_row(&row).map_err(store_error)
    }

    async fn get(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM comments WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(comment_from_row).transpose().map_err(store_error)
    }

    async fn delete_by_post(&self, post: PostId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(post.get())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn list_by_post(&self, post: PostId) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM comments WHERE post_id = $1 ORDER BY id"))
            .bind(post.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter().map(comment_from_row).collect::<Result<_, _>>().map_err(store_error)
    }
}
