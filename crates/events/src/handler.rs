//! Cascade handler contract and per-group dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use ripple_core::StoreError;

use crate::envelope::{EventEnvelope, EventKind};
use crate::publisher::PublishError;

/// Reasons a handler did not complete. The entry stays pending in every case.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The local store failed; the local transaction was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A downstream publish failed after the local effect committed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The envelope was routed to a handler for another kind.
    #[error("handler '{handler}' received a {found} event")]
    UnexpectedKind { handler: &'static str, found: EventKind },
}

impl HandlerError {
    pub fn unexpected(handler: &'static str, envelope: &EventEnvelope) -> Self {
        Self::UnexpectedKind {
            handler,
            found: envelope.kind(),
        }
    }
}

/// Service-local reaction to one kind of fact.
///
/// A handler performs one local, atomic, **idempotent** mutation: handling the
/// same envelope twice must leave the store as handling it once, and must not
/// fail the second time because the first already took effect. It may publish
/// follow-up facts, strictly after its local mutation has committed.
#[async_trait]
pub trait CascadeHandler: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// The kind of fact this handler reacts to.
    fn kind(&self) -> EventKind;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Maps event kinds to the handler a consumer group runs for them.
///
/// Kinds without a handler are acknowledged and skipped by the consumer loop.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Arc<dyn CascadeHandler>>,
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<_> = self.handlers.values().map(|h| h.name()).collect();
        names.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for its kind, returning the handler it replaced.
    pub fn register<H>(&mut self, handler: H) -> Option<Arc<dyn CascadeHandler>>
    where
        H: CascadeHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler))
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H>(mut self, handler: H) -> Self
    where
        H: CascadeHandler + 'static,
    {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn CascadeHandler>> {
        self.handlers.get(&kind)
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
