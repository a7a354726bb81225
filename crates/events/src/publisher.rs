//! Fire-and-forget event publishing.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::envelope::{CascadeEvent, EntryId, EventKind};
use crate::stream::{EventStream, StreamError};

/// The append failed; the event was not published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to publish {kind}: {source}")]
pub struct PublishError {
    pub kind: EventKind,
    #[source]
    pub source: StreamError,
}

/// Appends events to their topic.
///
/// Returns as soon as the log has accepted the entry; no consumer is awaited.
/// A failed append is returned to the caller, which decides whether the
/// triggering operation fails.
#[derive(Clone)]
pub struct Publisher {
    stream: Arc<dyn EventStream>,
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(stream: Arc<dyn EventStream>) -> Self {
        Self { stream }
    }

    #[instrument(skip(self, event), fields(topic = event.topic(), kind = %event.kind()), err)]
    pub async fn publish(&self, event: &CascadeEvent) -> Result<EntryId, PublishError> {
        let entry_id = self
            .stream
            .append(event.topic(), &event.encode())
            .await
            .map_err(|source| PublishError {
                kind: event.kind(),
                source,
            })?;

        debug!(%entry_id, "event published");
        Ok(entry_id)
    }
}
