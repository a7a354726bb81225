//! `ripple-cascade`: the four services' side of the cascade graph.
//!
//! Each service module carries its local model, the store trait its handlers
//! and request operations run against, an in-memory store, the cascade
//! handlers it subscribes, and the request-side operations that publish.
//!
//! ```text
//! user-events:  UserCreated  → media   (default avatar)
//!               UserDeleted  → post    (delete posts, publish PostDeleted each)
//!               UserDeleted  → media   (delete avatar)
//! post-events:  PostDeleted  → comment (delete comments and replies)
//!               PostDeleted  → media   (delete media rows)
//! media-events: AvatarUpdated → user   (copy url onto the user)
//! ```

pub mod comment;
pub mod error;
pub mod media;
pub mod post;
mod table;
pub mod user;
pub mod wiring;


pub use error::ServiceError;
pub use wiring::{start_consumers, ConsumerSettings, LocalStore, Service, Subscription};

/// Image url of a user without an uploaded avatar.
pub const DEFAULT_AVATAR_URL: &str = "default-avatar.jpg";
