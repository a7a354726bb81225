//! Stream transports backed by external infrastructure.
//!
//! The `EventStream` contract and the in-process implementation live in
//! `ripple-events`; this module adds the Redis Streams transport.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStream;
