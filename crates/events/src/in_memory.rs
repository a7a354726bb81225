//! In-memory stream for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::envelope::{EntryId, WireFields};
use crate::stream::{
    EventStream, GroupCreation, PendingEntry, ReadPosition, ReadRequest, StreamEntry, StreamError,
};

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Debug, Default)]
struct TopicLog {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

impl TopicLog {
    fn entry(&self, id: EntryId) -> Option<&StreamEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// In-process stream with consumer group semantics.
///
/// - Same delivery, pending and ack rules as the Redis transport
/// - Durable only for the lifetime of the process
/// - Blocking reads wake on append (no polling)
#[derive(Debug, Default)]
pub struct InMemoryStream {
    topics: Mutex<HashMap<String, TopicLog>>,
    appended: Notify,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry appended to `topic`, in order.
    pub fn entries(&self, topic: &str) -> Vec<StreamEntry> {
        match self.topics.lock() {
            Ok(topics) => topics.get(topic).map(|t| t.entries.clone()).unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, TopicLog>>, StreamError> {
        self.topics
            .lock()
            .map_err(|_| StreamError::transport("in-memory stream lock poisoned"))
    }

    fn deliver_new(&self, request: &ReadRequest<'_>) -> Result<Vec<StreamEntry>, StreamError> {
        let mut topics = self.lock()?;
        let TopicLog { entries, groups } = topics
            .get_mut(request.topic)
            .ok_or_else(|| StreamError::no_group(request.topic, request.group))?;
        let group = groups
            .get_mut(request.group)
            .ok_or_else(|| StreamError::no_group(request.topic, request.group))?;

        let start = entries.partition_point(|e| e.id <= group.last_delivered);
        let batch: Vec<StreamEntry> = entries[start..]
            .iter()
            .take(request.count.max(1))
            .cloned()
            .collect();

        let now = Instant::now();
        for entry in &batch {
            group.pending.insert(
                entry.id,
                PendingState {
                    consumer: request.consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
        }
        if let Some(last) = batch.last() {
            group.last_delivered = last.id;
        }
        Ok(batch)
    }

    fn redeliver_pending(
        &self,
        request: &ReadRequest<'_>,
        after: EntryId,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut topics = self.lock()?;
        let log = topics
            .get_mut(request.topic)
            .ok_or_else(|| StreamError::no_group(request.topic, request.group))?;
        let TopicLog { entries, groups } = log;
        let group = groups
            .get_mut(request.group)
            .ok_or_else(|| StreamError::no_group(request.topic, request.group))?;

        let now = Instant::now();
        let mut batch = Vec::new();
        for (id, state) in group.pending.range_mut(after..) {
            if batch.len() >= request.count.max(1) {
                break;
            }
            if *id == after || state.consumer != request.consumer {
                continue;
            }
            let Ok(idx) = entries.binary_search_by_key(id, |e| e.id) else {
                continue;
            };
            state.deliveries += 1;
            state.delivered_at = now;
            batch.push(entries[idx].clone());
        }
        Ok(batch)
    }
}

#[async_trait]
impl EventStream for InMemoryStream {
    async fn append(&self, topic: &str, fields: &WireFields) -> Result<EntryId, StreamError> {
        let id = {
            let mut topics = self.lock()?;
            let log = topics.entry(topic.to_string()).or_default();
            let last = log.entries.last().map(|e| e.id).unwrap_or(EntryId::ZERO);
            let now_millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
            let id = last.successor(now_millis);
            log.entries.push(StreamEntry {
                id,
                fields: fields.clone(),
            });
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<GroupCreation, StreamError> {
        let mut topics = self.lock()?;
        let log = topics.entry(topic.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }
        log.groups.insert(group.to_string(), GroupState::default());
        Ok(GroupCreation::Created)
    }

    async fn read(&self, request: &ReadRequest<'_>) -> Result<Vec<StreamEntry>, StreamError> {
        if let ReadPosition::PendingAfter(after) = request.position {
            return self.redeliver_pending(request, after);
        }

        let deadline = request.block.map(|block| Instant::now() + block);
        loop {
            // Register interest before checking, so an append between the
            // check and the await still wakes us.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.deliver_new(request)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<(), StreamError> {
        let mut topics = self.lock()?;
        if let Some(group) = topics.get_mut(topic).and_then(|t| t.groups.get_mut(group)) {
            group.pending.remove(&id);
        }
        Ok(())
    }

    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, StreamError> {
        let topics = self.lock()?;
        let state = topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .ok_or_else(|| StreamError::no_group(topic, group))?;

        let now = Instant::now();
        Ok(state
            .pending
            .iter()
            .take(count)
            .map(|(id, p)| PendingEntry {
                id: *id,
                consumer: p.consumer.clone(),
                idle: now.saturating_duration_since(p.delivered_at),
                deliveries: p.deliveries,
            })
            .collect())
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut topics = self.lock()?;
        let log = topics
            .get_mut(topic)
            .ok_or_else(|| StreamError::no_group(topic, group))?;

        let now = Instant::now();
        let mut claimed_ids = Vec::new();
        {
            let state = log
                .groups
                .get_mut(group)
                .ok_or_else(|| StreamError::no_group(topic, group))?;
            for id in ids {
                let Some(p) = state.pending.get_mut(id) else {
                    continue;
                };
                if now.saturating_duration_since(p.delivered_at) < min_idle {
                    continue;
                }
                p.consumer = consumer.to_string();
                p.delivered_at = now;
                p.deliveries += 1;
                claimed_ids.push(*id);
            }
        }

        Ok(claimed_ids
            .into_iter()
            .filter_map(|id| log.entry(id).cloned())
            .collect())
    }
}
