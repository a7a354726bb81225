//! Which groups a service runs, on which topics, with which handlers.
//!
//! | service | group         | topic        | handlers |
//! |---------|---------------|--------------|----------|
//! | user    | user-group    | media-events | AvatarUpdated |
//! | post    | post-group    | user-events  | UserDeleted |
//! | comment | comment-group | post-events  | PostDeleted |
//! | media   | media-group   | user-events  | UserCreated, UserDeleted |
//! | media   | media-group   | post-events  | PostDeleted |

use core::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use ripple_core::DomainError;
use ripple_events::{
    topics, Backoff, ConsumerConfig, ConsumerError, ConsumerHandle, ConsumerLoop, EventStream,
    HandlerRegistry, Publisher, ReclaimPolicy,
};

use crate::comment::{CommentStore, InMemoryCommentStore, PurgePostComments};
use crate::media::{CreateDefaultAvatar, InMemoryMediaStore, MediaStore, PurgePostMedia, RemoveAvatar};
use crate::post::{InMemoryPostStore, PostStore, PurgeUserPosts};
use crate::user::{InMemoryUserStore, SyncAvatarUrl, UserStore};

/// The logical services taking part in the cascade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Service {
    User,
    Post,
    Comment,
    Media,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::User, Service::Post, Service::Comment, Service::Media];

    pub const fn name(&self) -> &'static str {
        match self {
            Service::User => "user",
            Service::Post => "post",
            Service::Comment => "comment",
            Service::Media => "media",
        }
    }

    /// Consumer group shared by every instance of this service.
    pub const fn group(&self) -> &'static str {
        match self {
            Service::User => "user-group",
            Service::Post => "post-group",
            Service::Comment => "comment-group",
            Service::Media => "media-group",
        }
    }
}

impl core::fmt::Display for Service {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Service::ALL
            .into_iter()
            .find(|svc| svc.name() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown service '{s}'")))
    }
}

/// One consumer group on one topic with its handler table.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: &'static str,
    pub group: &'static str,
    pub registry: HandlerRegistry,
}

/// The private store of whichever service this process runs.
#[derive(Clone)]
pub enum LocalStore {
    User(Arc<dyn UserStore>),
    Post(Arc<dyn PostStore>),
    Comment(Arc<dyn CommentStore>),
    Media(Arc<dyn MediaStore>),
}

impl core::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("LocalStore").field(&self.service()).finish()
    }
}

impl LocalStore {
    /// Fresh in-memory store for `service` (tests/dev).
    pub fn in_memory(service: Service) -> Self {
        match service {
            Service::User => LocalStore::User(Arc::new(InMemoryUserStore::new())),
            Service::Post => LocalStore::Post(Arc::new(InMemoryPostStore::new())),
            Service::Comment => LocalStore::Comment(Arc::new(InMemoryCommentStore::new())),
            Service::Media => LocalStore::Media(Arc::new(InMemoryMediaStore::new())),
        }
    }

    pub fn service(&self) -> Service {
        match self {
            LocalStore::User(_) => Service::User,
            LocalStore::Post(_) => Service::Post,
            LocalStore::Comment(_) => Service::Comment,
            LocalStore::Media(_) => Service::Media,
        }
    }

    /// The consumer groups this service runs.
    ///
    /// `publisher` is used by handlers that chain further facts.
    pub fn subscriptions(&self, publisher: &Publisher) -> Vec<Subscription> {
        let group = self.service().group();
        match self {
            LocalStore::User(store) => vec![Subscription {
                topic: topics::MEDIA_EVENTS,
                group,
                registry: HandlerRegistry::new().with(SyncAvatarUrl::new(store.clone())),
            }],
            LocalStore::Post(store) => vec![Subscription {
                topic: topics::USER_EVENTS,
                group,
                registry: HandlerRegistry::new()
                    .with(PurgeUserPosts::new(store.clone(), publisher.clone())),
            }],
            LocalStore::Comment(store) => vec![Subscription {
                topic: topics::POST_EVENTS,
                group,
                registry: HandlerRegistry::new().with(PurgePostComments::new(store.clone())),
            }],
            LocalStore::Media(store) => vec![
                Subscription {
                    topic: topics::USER_EVENTS,
                    group,
                    registry: HandlerRegistry::new()
                        .with(CreateDefaultAvatar::new(store.clone()))
                        .with(RemoveAvatar::new(store.clone())),
                },
                Subscription {
                    topic: topics::POST_EVENTS,
                    group,
                    registry: HandlerRegistry::new().with(PurgePostMedia::new(store.clone())),
                },
            ],
        }
    }
}

/// Consumer loop settings shared by every group of one process.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub consumer: String,
    pub block: Option<Duration>,
    pub batch_size: usize,
    pub read_backoff: Backoff,
    pub pending_retry_interval: Option<Duration>,
    pub reclaim: Option<ReclaimPolicy>,
}

impl ConsumerSettings {
    pub fn new(consumer: impl Into<String>) -> Self {
        let defaults = ConsumerConfig::new("", "", "");
        Self {
            consumer: consumer.into(),
            block: defaults.block,
            batch_size: defaults.batch_size,
            read_backoff: defaults.read_backoff,
            pending_retry_interval: defaults.pending_retry_interval,
            reclaim: defaults.reclaim,
        }
    }

    pub fn config_for(&self, subscription: &Subscription) -> ConsumerConfig {
        ConsumerConfig::new(subscription.topic, subscription.group, self.consumer.clone())
            .with_block(self.block)
            .with_batch_size(self.batch_size)
            .with_read_backoff(self.read_backoff)
            .with_pending_retry(self.pending_retry_interval)
            .with_reclaim(self.reclaim)
    }
}

/// Start one consumer loop per subscription of the service owning `store`.
///
/// Either every loop starts or none keeps running: loops already started are
/// shut down before a group setup failure is returned.
pub async fn start_consumers(
    store: &LocalStore,
    stream: Arc<dyn EventStream>,
    settings: &ConsumerSettings,
) -> Result<Vec<ConsumerHandle>, ConsumerError> {
    let publisher = Publisher::new(stream.clone());
    let mut handles = Vec::new();

    for subscription in store.subscriptions(&publisher) {
        let config = settings.config_for(&subscription);
        let started = ConsumerLoop::new(config, stream.clone(), subscription.registry)
            .start()
            .await;
        match started {
            Ok(handle) => {
                info!(consumer = handle.label(), "consumer loop started");
                handles.push(handle);
            }
            Err(err) => {
                error!(error = %err, service = %store.service(), "consumer startup failed");
                for handle in handles {
                    let _ = handle.shutdown().await;
                }
                return Err(err);
            }
        }
    }
    Ok(handles)
}
