//! Cross-service event propagation mechanics.
//!
//! - [`envelope`]: the facts that travel between services and their flat wire form
//! - [`stream`]: the append-only log + consumer group primitive
//! - [`in_memory`]: an in-process stream for tests and single-process dev runs
//! - [`publisher`]: fire-and-forget appends
//! - [`handler`]: cascade handler contract and per-group dispatch table
//! - [`consumer`]: the long-running read → dispatch → ack loop
//!
//! Delivery is at-least-once. Handlers must be idempotent.

pub mod consumer;
pub mod envelope;
pub mod handler;
pub mod in_memory;
pub mod publisher;
pub mod stream;

pub use consumer::{
    Backoff, ConsumerConfig, ConsumerError, ConsumerHandle, ConsumerLoop, ConsumerState,
    ConsumerStatsSnapshot, ReclaimPolicy,
};
pub use envelope::{
    topics, AvatarUpdated, CascadeEvent, DecodeError, Decoded, EntryId, EventEnvelope, EventKind,
    PostDeleted, UserCreated, UserDeleted, WireFields, EVENT_FIELD,
};
pub use handler::{CascadeHandler, HandlerError, HandlerRegistry};
pub use in_memory::InMemoryStream;
pub use publisher::{PublishError, Publisher};
pub use stream::{EventStream, GroupCreation, PendingEntry, ReadPosition, ReadRequest, StreamEntry, StreamError};
