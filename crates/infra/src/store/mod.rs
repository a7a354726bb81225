//! Service-private store adapters.
//!
//! Store traits and in-memory implementations live in `ripple-cascade` next to
//! the handlers that use them; this module adds the Postgres implementations.

pub mod postgres;

pub use postgres::{connect, PgCommentStore, PgMediaStore, PgPostStore, PgUserStore};
