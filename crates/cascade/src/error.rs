use thiserror::Error;

use ripple_core::{DomainError, StoreError};
use ripple_events::PublishError;

/// Failure of a request-side service operation.
///
/// `Publish` is only returned after the local mutation has committed: the
/// caller learns that downstream services were not notified.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("committed locally, but not published: {0}")]
    Publish(#[from] PublishError),
}
