//! Consumer loop: blocking group reads → handler dispatch → ack.
//!
//! One loop runs per (topic, group) as its own task, beside the rest of the
//! service. Its lifecycle:
//!
//! ```text
//! STARTING → ENSURING_GROUP → RECOVERING → LISTENING ⇄ DISPATCHING
//!                  │                            │
//!                  └── error: never listens     └── shutdown → STOPPED
//! ```
//!
//! - Dispatch inside one loop is strictly sequential, in delivery order.
//! - A handler failure leaves the entry pending and the loop moves on.
//! - Unknown kinds and kinds without a handler in this group are acked.
//! - Read failures are retried with capped exponential backoff.
//! - Shutdown stops issuing reads; a handler already running finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::envelope::{CascadeEvent, Decoded, EntryId, EventEnvelope};
use crate::handler::HandlerRegistry;
use crate::stream::{EventStream, GroupCreation, ReadPosition, ReadRequest, StreamEntry, StreamError};

/// Lifecycle states of a consumer loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    EnsuringGroup,
    /// Re-dispatching entries left pending on this consumer by a previous run.
    Recovering,
    Listening,
    Dispatching,
    Stopped,
}

/// Capped exponential backoff for transport read failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay to wait after a failure, given the previous delay (if any).
    pub fn next(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.initial.min(self.max),
            Some(prev) => prev.saturating_mul(2).min(self.max),
        }
    }
}

/// Claiming entries left pending on other consumers of the group.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReclaimPolicy {
    /// Only entries idle at least this long are taken over.
    pub min_idle: Duration,
    /// How many pending rows are inspected per sweep.
    pub batch_size: usize,
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Name of this instance within the group.
    pub consumer: String,
    /// Blocking read timeout; `None` blocks until an entry arrives.
    pub block: Option<Duration>,
    /// Maximum entries per read.
    pub batch_size: usize,
    pub read_backoff: Backoff,
    /// How often this consumer's own pending entries are dispatched again.
    /// `None` only recovers them at start.
    pub pending_retry_interval: Option<Duration>,
    /// Takeover of entries stuck on other consumers. `None` disables it.
    pub reclaim: Option<ReclaimPolicy>,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            consumer: consumer.into(),
            block: None,
            batch_size: 16,
            read_backoff: Backoff::default(),
            pending_retry_interval: Some(Duration::from_secs(30)),
            reclaim: None,
        }
    }

    pub fn with_block(mut self, block: Option<Duration>) -> Self {
        self.block = block;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_read_backoff(mut self, backoff: Backoff) -> Self {
        self.read_backoff = backoff;
        self
    }

    pub fn with_pending_retry(mut self, interval: Option<Duration>) -> Self {
        self.pending_retry_interval = interval;
        self
    }

    pub fn with_reclaim(mut self, reclaim: Option<ReclaimPolicy>) -> Self {
        self.reclaim = reclaim;
        self
    }

    fn label(&self) -> String {
        format!("{}/{}/{}", self.topic, self.group, self.consumer)
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The group could not be ensured; the loop never started listening.
    #[error("cannot ensure consumer group '{group}' on '{topic}': {source}")]
    GroupSetup {
        topic: String,
        group: String,
        #[source]
        source: StreamError,
    },

    /// The loop task panicked or was aborted.
    #[error("consumer loop '{0}' terminated abnormally: {1}")]
    Join(String, String),
}

#[derive(Debug, Default)]
struct ConsumerStats {
    delivered: AtomicU64,
    redelivered: AtomicU64,
    acked: AtomicU64,
    handler_failures: AtomicU64,
    skipped: AtomicU64,
    malformed: AtomicU64,
    read_failures: AtomicU64,
    ack_failures: AtomicU64,
}

impl ConsumerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of a consumer loop.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    /// Entries handed to dispatch (first delivery and redelivery).
    pub delivered: u64,
    /// Of `delivered`, entries that came from the pending table.
    pub redelivered: u64,
    pub acked: u64,
    pub handler_failures: u64,
    /// Unknown kinds, or kinds this group has no handler for.
    pub skipped: u64,
    /// Entries that could not be decoded and were discarded.
    pub malformed: u64,
    pub read_failures: u64,
    pub ack_failures: u64,
}

/// Handle to observe and stop a running consumer loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    label: String,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConsumerState>,
    stats: Arc<ConsumerStats>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// `topic/group/consumer` of the loop.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait until the loop reaches `state` (or stops).
    pub async fn wait_for(&mut self, state: ConsumerState) -> ConsumerState {
        match self
            .state
            .wait_for(|s| *s == state || *s == ConsumerState::Stopped)
            .await
        {
            Ok(s) => *s,
            Err(_) => ConsumerState::Stopped,
        }
    }

    /// Stop issuing reads and wait for the loop to finish its current entry.
    pub async fn shutdown(self) -> Result<ConsumerStatsSnapshot, ConsumerError> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| ConsumerError::Join(self.label.clone(), e.to_string()))?;
        Ok(self.stats.snapshot())
    }
}

/// A consumer group reader bound to a handler table.
pub struct ConsumerLoop {
    config: ConsumerConfig,
    stream: Arc<dyn EventStream>,
    registry: HandlerRegistry,
    stats: Arc<ConsumerStats>,
    state: watch::Sender<ConsumerState>,
}

impl core::fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Delivery {
    First,
    Again,
}

impl ConsumerLoop {
    pub fn new(config: ConsumerConfig, stream: Arc<dyn EventStream>, registry: HandlerRegistry) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            config,
            stream,
            registry,
            stats: Arc::new(ConsumerStats::default()),
            state,
        }
    }

    /// Ensure the group exists, then spawn the loop on the current runtime.
    ///
    /// Group setup failure is returned here and nothing is spawned: a service
    /// must not run without its cascade guarantees.
    pub async fn start(self) -> Result<ConsumerHandle, ConsumerError> {
        self.ensure_group().await?;

        let label = self.config.label();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.subscribe();
        let stats = self.stats.clone();
        let span = info_span!(
            "consumer",
            topic = %self.config.topic,
            group = %self.config.group,
            consumer = %self.config.consumer
        );
        let join = tokio::spawn(self.run(shutdown_rx).instrument(span));

        Ok(ConsumerHandle {
            label,
            shutdown: shutdown_tx,
            state,
            stats,
            join,
        })
    }

    async fn ensure_group(&self) -> Result<(), ConsumerError> {
        self.set_state(ConsumerState::EnsuringGroup);
        match self.stream.create_group(&self.config.topic, &self.config.group).await {
            Ok(GroupCreation::Created) => {
                info!(topic = %self.config.topic, group = %self.config.group, "consumer group created");
                Ok(())
            }
            Ok(GroupCreation::AlreadyExists) => {
                debug!(topic = %self.config.topic, group = %self.config.group, "consumer group already exists");
                Ok(())
            }
            Err(source) => {
                self.set_state(ConsumerState::Stopped);
                Err(ConsumerError::GroupSetup {
                    topic: self.config.topic.clone(),
                    group: self.config.group.clone(),
                    source,
                })
            }
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.set_state(ConsumerState::Recovering);
        self.redeliver_own_pending(&shutdown).await;

        let period = self.config.pending_retry_interval;
        let mut next_sweep = period.map(|p| Instant::now() + p);
        let mut backoff: Option<Duration> = None;

        info!("consumer loop listening");
        loop {
            self.set_state(ConsumerState::Listening);
            if *shutdown.borrow() {
                break;
            }

            if let (Some(at), Some(p)) = (next_sweep, period) {
                if Instant::now() >= at {
                    self.sweep_pending(&shutdown).await;
                    next_sweep = Some(Instant::now() + p);
                    continue;
                }
            }

            let request = ReadRequest {
                topic: &self.config.topic,
                group: &self.config.group,
                consumer: &self.config.consumer,
                position: ReadPosition::New,
                count: self.config.batch_size,
                block: self.block_until(next_sweep),
            };

            let read = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                read = self.stream.read(&request) => read,
            };

            match read {
                Ok(entries) => {
                    backoff = None;
                    self.dispatch_batch(entries, Delivery::First).await;
                }
                Err(err) => {
                    ConsumerStats::bump(&self.stats.read_failures);
                    let delay = self.config.read_backoff.next(backoff);
                    backoff = Some(delay);
                    error!(error = %err, retry_in_ms = delay.as_millis() as u64, "stream read failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(stats = ?self.stats.snapshot(), "consumer loop stopped");
    }

    /// Read timeout that also wakes the loop for the next pending sweep.
    fn block_until(&self, next_sweep: Option<Instant>) -> Option<Duration> {
        let until_sweep = next_sweep.map(|at| at.saturating_duration_since(Instant::now()));
        match (self.config.block, until_sweep) {
            (None, None) => None,
            (Some(block), None) => Some(block),
            (None, Some(wait)) => Some(wait),
            (Some(block), Some(wait)) => Some(block.min(wait)),
        }
    }

    async fn sweep_pending(&self, shutdown: &watch::Receiver<bool>) {
        self.redeliver_own_pending(shutdown).await;
        if let Some(policy) = self.config.reclaim {
            self.reclaim_idle(policy).await;
        }
    }

    /// Dispatch every entry still pending on this consumer, oldest first.
    async fn redeliver_own_pending(&self, shutdown: &watch::Receiver<bool>) {
        let mut cursor = EntryId::ZERO;
        loop {
            if *shutdown.borrow() {
                return;
            }
            let request = ReadRequest {
                topic: &self.config.topic,
                group: &self.config.group,
                consumer: &self.config.consumer,
                position: ReadPosition::PendingAfter(cursor),
                count: self.config.batch_size,
                block: None,
            };
            let entries = match self.stream.read(&request).await {
                Ok(entries) => entries,
                Err(err) => {
                    ConsumerStats::bump(&self.stats.read_failures);
                    warn!(error = %err, "reading own pending entries failed");
                    return;
                }
            };
            let Some(last) = entries.last().map(|e| e.id) else {
                return;
            };
            debug!(count = entries.len(), "re-dispatching pending entries");
            cursor = last;
            self.dispatch_batch(entries, Delivery::Again).await;
        }
    }

    /// Take over entries idle on other (presumed dead) consumers.
    async fn reclaim_idle(&self, policy: ReclaimPolicy) {
        let topic = &self.config.topic;
        let group = &self.config.group;
        let pending = match self.stream.pending(topic, group, policy.batch_size).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "listing pending entries failed");
                return;
            }
        };

        let stale: Vec<EntryId> = pending
            .into_iter()
            .filter(|p| p.consumer != self.config.consumer && p.idle >= policy.min_idle)
            .map(|p| p.id)
            .collect();
        if stale.is_empty() {
            return;
        }

        match self
            .stream
            .claim(topic, group, &self.config.consumer, policy.min_idle, &stale)
            .await
        {
            Ok(claimed) => {
                info!(count = claimed.len(), "reclaimed idle entries from other consumers");
                self.dispatch_batch(claimed, Delivery::Again).await;
            }
            Err(err) => warn!(error = %err, "claiming idle entries failed"),
        }
    }

    async fn dispatch_batch(&self, entries: Vec<StreamEntry>, delivery: Delivery) {
        if entries.is_empty() {
            return;
        }
        self.set_state(ConsumerState::Dispatching);
        for entry in entries {
            ConsumerStats::bump(&self.stats.delivered);
            if delivery == Delivery::Again {
                ConsumerStats::bump(&self.stats.redelivered);
            }
            self.dispatch(entry).await;
        }
    }

    async fn dispatch(&self, entry: StreamEntry) {
        let entry_id = entry.id;
        let event = match CascadeEvent::decode(&entry.fields) {
            Ok(Decoded::Known(event)) => event,
            Ok(Decoded::Unknown(kind)) => {
                debug!(%entry_id, kind = %kind, "skipping unknown event kind");
                ConsumerStats::bump(&self.stats.skipped);
                self.ack(entry_id).await;
                return;
            }
            Err(err) => {
                error!(%entry_id, error = %err, "discarding malformed envelope");
                ConsumerStats::bump(&self.stats.malformed);
                self.ack(entry_id).await;
                return;
            }
        };

        let envelope = EventEnvelope::new(self.config.topic.clone(), entry_id, event);
        let Some(handler) = self.registry.get(envelope.kind()) else {
            debug!(%entry_id, kind = %envelope.kind(), "no handler in this group");
            ConsumerStats::bump(&self.stats.skipped);
            self.ack(entry_id).await;
            return;
        };

        match handler.handle(&envelope).await {
            Ok(()) => {
                debug!(%entry_id, handler = handler.name(), "cascade handled");
                self.ack(entry_id).await;
            }
            Err(err) => {
                ConsumerStats::bump(&self.stats.handler_failures);
                warn!(
                    %entry_id,
                    handler = handler.name(),
                    error = %err,
                    "cascade handler failed; entry left pending"
                );
            }
        }
    }

    async fn ack(&self, entry_id: EntryId) {
        match self
            .stream
            .ack(&self.config.topic, &self.config.group, entry_id)
            .await
        {
            Ok(()) => ConsumerStats::bump(&self.stats.acked),
            Err(err) => {
                // Still pending: it will be redelivered and handled again.
                ConsumerStats::bump(&self.stats.ack_failures);
                warn!(%entry_id, error = %err, "ack failed");
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use ripple_core::{PostId, StoreError, UserId};

    use super::*;
    use crate::envelope::{topics, EventKind, WireFields};
    use crate::handler::{CascadeHandler, HandlerError};
    use crate::in_memory::InMemoryStream;
    use crate::publisher::Publisher;
    use crate::stream::PendingEntry;

    const GROUP: &str = "comment-group";

    /// Records post ids in handling order; fails the first `fail_first` calls.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PostId>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl CascadeHandler for Arc<Recorder> {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn kind(&self) -> EventKind {
            EventKind::PostDeleted
        }

        async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
            let CascadeEvent::PostDeleted(ev) = envelope.event() else {
                return Err(HandlerError::unexpected(self.name(), envelope));
            };
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::unavailable("db down").into());
            }
            self.seen.lock().unwrap().push(ev.post_id);
            Ok(())
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig::new(topics::POST_EVENTS, GROUP, "comment-1")
            .with_block(Some(Duration::from_millis(20)))
            .with_pending_retry(None)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn dispatches_in_append_order_and_acks() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = Publisher::new(stream.clone());
        let recorder = Arc::new(Recorder::default());
        let handle = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        for id in 1..=5 {
            publisher.publish(&CascadeEvent::post_deleted(PostId::new(id))).await.unwrap();
        }

        eventually(|| recorder.seen.lock().unwrap().len() == 5).await;
        assert_eq!(*recorder.seen.lock().unwrap(), (1..=5).map(PostId::new).collect::<Vec<_>>());

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.acked, 5);
        assert!(stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_kinds_are_acked_and_do_not_block() {
        let stream = Arc::new(InMemoryStream::new());
        let recorder = Arc::new(Recorder::default());
        let handle = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        let mut unknown = WireFields::new();
        unknown.insert("event".to_string(), "post_archived".to_string());
        unknown.insert("post_id".to_string(), "9".to_string());
        stream.append(topics::POST_EVENTS, &unknown).await.unwrap();
        Publisher::new(stream.clone())
            .publish(&CascadeEvent::post_deleted(PostId::new(10)))
            .await
            .unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.acked, 2);
        assert!(stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_entries_are_discarded() {
        let stream = Arc::new(InMemoryStream::new());
        let recorder = Arc::new(Recorder::default());
        let mut handle = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        let mut bad = WireFields::new();
        bad.insert("event".to_string(), "post_deleted".to_string());
        bad.insert("post_id".to_string(), "not-a-number".to_string());
        stream.append(topics::POST_EVENTS, &bad).await.unwrap();

        eventually(|| handle.stats().malformed == 1).await;
        handle.wait_for(ConsumerState::Listening).await;
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.acked, 1);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_entry_stays_pending_and_loop_moves_on() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = Publisher::new(stream.clone());
        let recorder = Arc::new(Recorder {
            fail_first: AtomicUsize::new(1),
            ..Recorder::default()
        });
        let handle = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        let poisoned = publisher.publish(&CascadeEvent::post_deleted(PostId::new(1))).await.unwrap();
        publisher.publish(&CascadeEvent::post_deleted(PostId::new(2))).await.unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![PostId::new(2)]);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.handler_failures, 1);
        let pending: Vec<PendingEntry> = stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, poisoned);
    }

    #[tokio::test]
    async fn pending_entries_are_recovered_on_restart() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = Publisher::new(stream.clone());
        let recorder = Arc::new(Recorder {
            fail_first: AtomicUsize::new(1),
            ..Recorder::default()
        });

        let first = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();
        publisher.publish(&CascadeEvent::post_deleted(PostId::new(7))).await.unwrap();
        eventually(|| first.stats().handler_failures == 1).await;
        first.shutdown().await.unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());

        // Same consumer name comes back: its pending entry is dispatched again.
        let second = ConsumerLoop::new(config(), stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();
        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        let stats = second.shutdown().await.unwrap();
        assert_eq!(stats.redelivered, 1);
        assert!(stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn periodic_sweep_retries_failed_entries() {
        let stream = Arc::new(InMemoryStream::new());
        let recorder = Arc::new(Recorder {
            fail_first: AtomicUsize::new(2),
            ..Recorder::default()
        });
        let cfg = config().with_pending_retry(Some(Duration::from_millis(50)));
        let handle = ConsumerLoop::new(cfg, stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        Publisher::new(stream.clone())
            .publish(&CascadeEvent::post_deleted(PostId::new(3)))
            .await
            .unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.handler_failures, 2);
        assert_eq!(stats.acked, 1);
        assert!(stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reclaim_takes_over_entries_of_a_dead_consumer() {
        let stream = Arc::new(InMemoryStream::new());
        stream.create_group(topics::POST_EVENTS, GROUP).await.unwrap();
        Publisher::new(stream.clone())
            .publish(&CascadeEvent::post_deleted(PostId::new(5)))
            .await
            .unwrap();

        // A sibling reads the entry and dies before acking.
        let claimed_by_dead = stream
            .read(&ReadRequest {
                topic: topics::POST_EVENTS,
                group: GROUP,
                consumer: "comment-dead",
                position: ReadPosition::New,
                count: 10,
                block: Some(Duration::ZERO),
            })
            .await
            .unwrap();
        assert_eq!(claimed_by_dead.len(), 1);

        let recorder = Arc::new(Recorder::default());
        let cfg = config()
            .with_pending_retry(Some(Duration::from_millis(30)))
            .with_reclaim(Some(ReclaimPolicy {
                min_idle: Duration::from_millis(10),
                batch_size: 10,
            }));
        let handle = ConsumerLoop::new(cfg, stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        handle.shutdown().await.unwrap();
        assert!(stream.pending(topics::POST_EVENTS, GROUP, 10).await.unwrap().is_empty());
    }

    /// Stream whose group setup and reads fail, for startup and backoff paths.
    #[derive(Default)]
    struct BrokenStream {
        reads: AtomicUsize,
        refuse_groups: bool,
        inner: InMemoryStream,
    }

    #[async_trait]
    impl EventStream for BrokenStream {
        async fn append(&self, topic: &str, fields: &WireFields) -> Result<EntryId, StreamError> {
            self.inner.append(topic, fields).await
        }

        async fn create_group(&self, topic: &str, group: &str) -> Result<GroupCreation, StreamError> {
            if self.refuse_groups {
                return Err(StreamError::transport("connection refused"));
            }
            self.inner.create_group(topic, group).await
        }

        async fn read(&self, request: &ReadRequest<'_>) -> Result<Vec<StreamEntry>, StreamError> {
            if request.position == ReadPosition::New && self.reads.fetch_add(1, Ordering::SeqCst) < 3 {
                return Err(StreamError::transport("connection reset"));
            }
            self.inner.read(request).await
        }

        async fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<(), StreamError> {
            self.inner.ack(topic, group, id).await
        }

        async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, StreamError> {
            self.inner.pending(topic, group, count).await
        }

        async fn claim(
            &self,
            topic: &str,
            group: &str,
            consumer: &str,
            min_idle: Duration,
            ids: &[EntryId],
        ) -> Result<Vec<StreamEntry>, StreamError> {
            self.inner.claim(topic, group, consumer, min_idle, ids).await
        }
    }

    #[tokio::test]
    async fn group_setup_failure_is_fatal() {
        let stream = Arc::new(BrokenStream {
            refuse_groups: true,
            ..BrokenStream::default()
        });
        let err = ConsumerLoop::new(config(), stream, HandlerRegistry::new())
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::GroupSetup { .. }));
    }

    #[tokio::test]
    async fn read_failures_are_retried_with_backoff() {
        let stream = Arc::new(BrokenStream::default());
        let recorder = Arc::new(Recorder::default());
        let cfg = config().with_read_backoff(Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
        });
        let handle = ConsumerLoop::new(cfg, stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        Publisher::new(stream.clone())
            .publish(&CascadeEvent::post_deleted(PostId::new(11)))
            .await
            .unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.read_failures, 3);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let backoff = Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        let first = backoff.next(None);
        let second = backoff.next(Some(first));
        let third = backoff.next(Some(second));
        assert_eq!(
            [first, second, third],
            [Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(350)]
        );
    }

    #[tokio::test]
    async fn handlers_only_see_their_topic() {
        // Kinds without a handler in the group are acked, never dispatched.
        let stream = Arc::new(InMemoryStream::new());
        let recorder = Arc::new(Recorder::default());
        let cfg = ConsumerConfig::new(topics::USER_EVENTS, "post-group", "post-1")
            .with_block(Some(Duration::from_millis(20)))
            .with_pending_retry(None);
        let handle = ConsumerLoop::new(cfg, stream.clone(), HandlerRegistry::new().with(recorder.clone()))
            .start()
            .await
            .unwrap();

        Publisher::new(stream.clone())
            .publish(&CascadeEvent::user_created(UserId::new(1)))
            .await
            .unwrap();

        eventually(|| handle.stats().skipped == 1).await;
        handle.shutdown().await.unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
