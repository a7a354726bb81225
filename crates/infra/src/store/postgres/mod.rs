//! Postgres-backed local stores.
//!
//! Each service owns its own database; a store only touches its own tables.
//! Every trait method is one SQL statement, so each handler mutation commits
//! or rolls back as a unit.
//!
//! `ensure_schema()` creates the store's tables if absent and is safe to call
//! on every start.

mod comments;
mod media;
mod posts;
mod users;

pub use comments::PgCommentStore;
pub use media::PgMediaStore;
pub use posts::PgPostStore;
pub use users::PgUserStore;

use ripple_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool to `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(store_error)
}

/// Connectivity problems are `Unavailable`; everything else the server or
/// the driver rejected is `Query`.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::unavailable(e.to_string()),
        other => StoreError::query(other.to_string()),
    }
}

pub(crate) async fn execute_all(pool: &PgPool, statements: &[&str]) -> Result<(), StoreError> {
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(store_error)?;
    }
    Ok(())
}
