//! Builds the stream client and the local store, then runs the consumer loops.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use ripple_cascade::{start_consumers, LocalStore, Service};
use ripple_core::StoreError;
use ripple_events::{ConsumerError, ConsumerHandle, EventStream, InMemoryStream, Publisher, StreamError};
use ripple_infra::store::connect;
use ripple_infra::{PgCommentStore, PgMediaStore, PgPostStore, PgUserStore, RedisStream};

use crate::config::NodeConfig;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot reach the stream: {0}")]
    Stream(#[from] StreamError),

    #[error("cannot open the local store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// A started service: its store, its stream client and its consumer loops.
pub struct RunningNode {
    service: Service,
    store: LocalStore,
    stream: Arc<dyn EventStream>,
    consumers: Vec<ConsumerHandle>,
}

impl core::fmt::Debug for RunningNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunningNode")
            .field("service", &self.service)
            .field("consumers", &self.consumers)
            .finish_non_exhaustive()
    }
}

/// Connect, ensure schema and groups, and start every consumer loop of the
/// configured service. Any failure here means the service must not serve.
pub async fn start(config: NodeConfig) -> Result<RunningNode, NodeError> {
    let stream = connect_stream(&config).await?;
    let store = open_store(&config).await?;
    let consumers = start_consumers(&store, stream.clone(), &config.consumer).await?;

    info!(
        service = %config.service,
        consumer = %config.consumer.consumer,
        loops = consumers.len(),
        "service started"
    );
    Ok(RunningNode {
        service: config.service,
        store,
        stream,
        consumers,
    })
}

async fn connect_stream(config: &NodeConfig) -> Result<Arc<dyn EventStream>, NodeError> {
    match &config.redis_url {
        Some(url) => Ok(Arc::new(RedisStream::connect(url).await?)),
        None => {
            warn!("REDIS_URL not set; using an in-process stream (events stay inside this process)");
            Ok(Arc::new(InMemoryStream::new()))
        }
    }
}

async fn open_store(config: &NodeConfig) -> Result<LocalStore, NodeError> {
    let Some(url) = &config.database_url else {
        warn!("DATABASE_URL not set; using an in-memory store");
        return Ok(LocalStore::in_memory(config.service));
    };

    let pool = connect(url, config.database_max_connections).await?;
    let store = match config.service {
        Service::User => {
            let store = PgUserStore::new(pool);
            store.ensure_schema().await?;
            LocalStore::User(Arc::new(store))
        }
        Service::Post => {
            let store = PgPostStore::new(pool);
            store.ensure_schema().await?;
            LocalStore::Post(Arc::new(store))
        }
        Service::Comment => {
            let store = PgCommentStore::new(pool);
            store.ensure_schema().await?;
            LocalStore::Comment(Arc::new(store))
        }
        Service::Media => {
            let store = PgMediaStore::new(pool);
            store.ensure_schema().await?;
            LocalStore::Media(Arc::new(store))
        }
    };
    Ok(store)
}

impl RunningNode {
    pub fn service(&self) -> Service {
        self.service
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Publisher on the same stream the consumers read, for request-side code.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.stream.clone())
    }

    pub fn consumers(&self) -> &[ConsumerHandle] {
        &self.consumers
    }

    /// Stop reading; in-flight handlers finish before this returns.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        let mut first_error = None;
        for handle in self.consumers {
            let label = handle.label().to_string();
            match handle.shutdown().await {
                Ok(stats) => info!(consumer = %label, ?stats, "consumer stopped"),
                Err(err) => {
                    warn!(consumer = %label, error = %err, "consumer did not stop cleanly");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => {
                info!(service = %self.service, "service stopped");
                Ok(())
            }
        }
    }
}
