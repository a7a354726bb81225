//! Entries left pending by a stopped process are picked up by the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use ripple_cascade::{Service, Subscription};
use ripple_core::{PostId, StoreError};
use ripple_events::{
    topics, CascadeEvent, CascadeHandler, ConsumerHandle, ConsumerLoop, EventEnvelope, EventKind,
    EventStream, HandlerError, HandlerRegistry, InMemoryStream, Publisher,
};
use ripple_node::NodeConfig;

/// Fails its first call, as a store outage would. Clones share the count.
#[derive(Clone, Default)]
struct FailsOnce {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CascadeHandler for FailsOnce {
    fn name(&self) -> &'static str {
        "fails-once"
    }

    fn kind(&self) -> EventKind {
        EventKind::PostDeleted
    }

    async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::unavailable("comment db down").into());
        }
        Ok(())
    }
}

fn load_config() -> NodeConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("RIPPLE_SERVICE", "comment"),
        ("RIPPLE_BLOCK_MS", "20"),
    ]);
    NodeConfig::from_lookup(|var| vars.get(var).map(|v| v.to_string())).unwrap()
}

async fn start(
    config: &NodeConfig,
    stream: Arc<dyn EventStream>,
    handler: FailsOnce,
) -> ConsumerHandle {
    let subscription = Subscription {
        topic: topics::POST_EVENTS,
        group: Service::Comment.group(),
        registry: HandlerRegistry::new().with(handler),
    };
    ConsumerLoop::new(config.consumer.config_for(&subscription), stream, subscription.registry)
        .start()
        .await
        .unwrap()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..300 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn restarted_service_redelivers_what_the_previous_run_left_pending() {
    let stream = Arc::new(InMemoryStream::new());
    let handler = FailsOnce::default();

    let first_run = load_config();
    let first = start(&first_run, stream.clone(), handler.clone()).await;
    Publisher::new(stream.clone())
        .publish(&CascadeEvent::post_deleted(PostId::new(101)))
        .await
        .unwrap();
    wait_until(|| first.stats().handler_failures == 1).await;
    first.shutdown().await.unwrap();

    let left = stream
        .pending(topics::POST_EVENTS, Service::Comment.group(), 10)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);

    let second_run = load_config();
    assert_eq!(second_run.consumer.consumer, first_run.consumer.consumer);
    let second = start(&second_run, stream.clone(), handler.clone()).await;
    wait_until(|| second.stats().acked == 1).await;

    let stats = second.shutdown().await.unwrap();
    assert_eq!(stats.redelivered, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert!(stream
        .pending(topics::POST_EVENTS, Service::Comment.group(), 10)
        .await
        .unwrap()
        .is_empty());
}
