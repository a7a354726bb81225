//! Append-only stream + consumer group primitive.
//!
//! A stream is a durable, per-topic log of [`StreamEntry`] values in append
//! order. A consumer group is a durable cursor plus a pending-entry table over
//! one topic, shared by competing consumers of one logical service:
//!
//! ```text
//! append ──► [e1][e2][e3][e4] ...        topic log (append-only)
//!                     ▲
//!                     └── group.last_delivered
//! group.pending = { e2 → consumer-a, e3 → consumer-a }   (read, not yet acked)
//! ```
//!
//! `read` moves the cursor and records the delivered entries as pending
//! *before* any handler runs, so a crash between read and ack leaves the entry
//! in the pending table where it can be read again.
//!
//! ## Implementations
//!
//! - [`InMemoryStream`](crate::in_memory::InMemoryStream): tests and single-process dev runs
//! - `RedisStream` in `ripple-infra`: Redis Streams (XADD / XGROUP / XREADGROUP / XACK)

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::{EntryId, WireFields};

/// One raw entry as stored in a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: WireFields,
}

/// Outcome of creating a consumer group. Both outcomes are success.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// Where a group read starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadPosition {
    /// Entries never delivered to any member of the group. May block.
    New,
    /// Entries already pending on this consumer with an id greater than the
    /// given one. Never blocks.
    PendingAfter(EntryId),
}

/// Arguments of a consumer group read.
#[derive(Debug, Clone)]
pub struct ReadRequest<'a> {
    pub topic: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    pub position: ReadPosition,
    /// Maximum number of entries returned. `0` reads as `1`.
    pub count: usize,
    /// How long a [`ReadPosition::New`] read waits for an entry to arrive.
    /// `None` waits indefinitely.
    pub block: Option<Duration>,
}

/// One row of a group's pending-entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    /// Time since the entry was last delivered.
    pub idle: Duration,
    /// Number of times the entry has been delivered.
    pub deliveries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The log server could not be reached or the connection broke.
    #[error("stream transport failed: {0}")]
    Transport(String),

    /// The group has not been created on this topic.
    #[error("consumer group '{group}' does not exist on '{topic}'")]
    NoGroup { topic: String, group: String },

    /// The log server answered with something that could not be interpreted.
    #[error("unexpected stream reply: {0}")]
    Protocol(String),
}

impl StreamError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn no_group(topic: &str, group: &str) -> Self {
        Self::NoGroup {
            topic: topic.to_string(),
            group: group.to_string(),
        }
    }
}

/// Durable log with consumer groups (transport contract).
///
/// All operations surface transport failures synchronously to the caller.
/// Implementations must be shareable across tasks.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Append `fields` to `topic` and return the id the log assigned.
    ///
    /// Ids are strictly increasing within a topic.
    async fn append(&self, topic: &str, fields: &WireFields) -> Result<EntryId, StreamError>;

    /// Create `group` on `topic` (and the topic itself if absent).
    ///
    /// New groups start before the first entry, so history appended before
    /// the group existed is still delivered. Creating an existing group is
    /// [`GroupCreation::AlreadyExists`], not an error.
    async fn create_group(&self, topic: &str, group: &str) -> Result<GroupCreation, StreamError>;

    /// Read entries for one consumer of a group, in append order.
    ///
    /// Entries returned from [`ReadPosition::New`] are recorded as pending on
    /// the consumer before this call returns.
    async fn read(&self, request: &ReadRequest<'_>) -> Result<Vec<StreamEntry>, StreamError>;

    /// Remove `id` from the group's pending table. Acking an id that is not
    /// pending is a no-op.
    async fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<(), StreamError>;

    /// Up to `count` rows of the group's pending table, oldest first.
    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, StreamError>;

    /// Move pending entries idle for at least `min_idle` to `consumer` and
    /// return them. Ids not pending, or not idle long enough, are skipped.
    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StreamError>;
}
