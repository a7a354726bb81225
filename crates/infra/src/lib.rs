//! Infrastructure layer: the Redis stream transport and Postgres stores.

pub mod store;
pub mod stream;

pub use store::{PgCommentStore, PgMediaStore, PgPostStore, PgUserStore};
#[cfg(feature = "redis")]
pub use stream::RedisStream;
