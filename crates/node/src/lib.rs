//! Composition root of one ripple service process.
//!
//! - [`config`]: environment configuration
//! - [`app`]: builds the stream client and local store, runs the consumer loops

pub mod app;
pub mod config;

pub use app::{start, NodeError, RunningNode};
pub use config::{ConfigError, NodeConfig};
