//! `ripple-core`: identifiers and error types shared by every service.
//!
//! This crate holds no infrastructure concerns: no stream transport, no storage.

pub mod error;
pub mod id;

pub use error::{DomainError, StoreError};
pub use id::{AvatarId, CommentId, MediaId, PostId, UserId};
