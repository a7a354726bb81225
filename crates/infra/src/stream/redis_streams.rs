//! Redis Streams transport (durable, at-least-once delivery).
//!
//! Mapping of the stream contract onto Redis commands:
//!
//! | operation      | command |
//! |----------------|---------|
//! | `append`       | `XADD <topic> * field value ...` |
//! | `create_group` | `XGROUP CREATE <topic> <group> 0 MKSTREAM` (`BUSYGROUP` = already exists) |
//! | `read` (new)   | `XREADGROUP GROUP <group> <consumer> COUNT n BLOCK ms STREAMS <topic> >` |
//! | `read` (own pending) | same, with the last seen id instead of `>` |
//! | `ack`          | `XACK <topic> <group> <id>` |
//! | `pending`      | `XPENDING <topic> <group> - + <count>` |
//! | `claim`        | `XCLAIM <topic> <group> <consumer> <min-idle-ms> <id> ...` |
//!
//! ## Connections
//!
//! - Non-blocking commands share one `ConnectionManager` (reconnects on its own).
//! - Each consumer gets its own connection for `XREADGROUP ... BLOCK`, so a
//!   read parked on the server never delays appends, acks, or other groups.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, RedisError, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use ripple_events::{
    EntryId, EventStream, GroupCreation, PendingEntry, ReadPosition, ReadRequest, StreamEntry,
    StreamError, WireFields,
};

pub struct RedisStream {
    client: Client,
    manager: ConnectionManager,
    /// Blocking-read connection per consumer name.
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl core::fmt::Debug for RedisStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStream")
            .field("server", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisStream {
    /// Connect to the log server at `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str) -> Result<Self, StreamError> {
        let client = Client::open(redis_url).map_err(|e| StreamError::transport(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(stream_error)?;
        Ok(Self {
            client,
            manager,
            readers: Mutex::new(HashMap::new()),
        })
    }

    async fn reader(&self, consumer: &str) -> Result<MultiplexedConnection, StreamError> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(stream_error)?;
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    async fn drop_reader(&self, consumer: &str) {
        self.readers.lock().await.remove(consumer);
    }
}

#[async_trait]
impl EventStream for RedisStream {
    #[instrument(skip(self, fields), err)]
    async fn append(&self, topic: &str, fields: &WireFields) -> Result<EntryId, StreamError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let mut conn = self.manager.clone();
        let reply: Value = cmd.query_async(&mut conn).await.map_err(stream_error)?;
        parse_entry_id(&reply)
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<GroupCreation, StreamError> {
        let mut conn = self.manager.clone();
        let created: Result<Value, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => Ok(GroupCreation::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupCreation::AlreadyExists),
            Err(e) => Err(stream_error(e)),
        }
    }

    async fn read(&self, request: &ReadRequest<'_>) -> Result<Vec<StreamEntry>, StreamError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(request.group)
            .arg(request.consumer)
            .arg("COUNT")
            .arg(request.count.max(1));

        let start = match request.position {
            ReadPosition::New => {
                cmd.arg("BLOCK").arg(block_millis(request.block));
                ">".to_string()
            }
            ReadPosition::PendingAfter(after) => after.to_string(),
        };
        cmd.arg("STREAMS").arg(request.topic).arg(start);

        let reply: Result<Value, RedisError> = match request.position {
            ReadPosition::New => {
                let mut conn = self.reader(request.consumer).await?;
                cmd.query_async(&mut conn).await
            }
            ReadPosition::PendingAfter(_) => {
                let mut conn = self.manager.clone();
                cmd.query_async(&mut conn).await
            }
        };

        match reply {
            Ok(reply) => {
                let entries = parse_read_reply(&reply)?;
                if !entries.is_empty() {
                    debug!(topic = request.topic, count = entries.len(), "entries read");
                }
                Ok(entries)
            }
            Err(e) => {
                if is_connection_failure(&e) {
                    warn!(consumer = request.consumer, error = %e, "dropping broken reader connection");
                    self.drop_reader(request.consumer).await;
                }
                Err(no_group_or(e, request.topic, request.group))
            }
        }
    }

    async fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<(), StreamError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(stream_error)?;
        Ok(())
    }

    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, StreamError> {
        let mut conn = self.manager.clone();
        let reply: Value = redis::cmd("XPENDING")
            .arg(topic)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| no_group_or(e, topic, group))?;
        parse_pending_reply(&reply)
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX));
        for id in ids {
            cmd.arg(id.to_string());
        }
        let mut conn = self.manager.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| no_group_or(e, topic, group))?;
        parse_entries(&reply)
    }
}

/// `BLOCK` argument: Redis reads `0` as "forever", so a finite timeout is at
/// least one millisecond.
fn block_millis(block: Option<Duration>) -> u64 {
    match block {
        None => 0,
        Some(d) => u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1),
    }
}

fn is_connection_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn stream_error(e: RedisError) -> StreamError {
    if is_connection_failure(&e) {
        StreamError::transport(e.to_string())
    } else {
        StreamError::protocol(e.to_string())
    }
}

fn no_group_or(e: RedisError, topic: &str, group: &str) -> StreamError {
    if e.code() == Some("NOGROUP") {
        StreamError::no_group(topic, group)
    } else {
        stream_error(e)
    }
}

fn text(value: &Value) -> Result<String, StreamError> {
    match value {
        Value::Data(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| StreamError::protocol("non utf-8 string in reply")),
        Value::Status(s) => Ok(s.clone()),
        other => Err(StreamError::protocol(format!("expected string, got {other:?}"))),
    }
}

fn integer(value: &Value) -> Result<u64, StreamError> {
    match value {
        Value::Int(n) => u64::try_from(*n).map_err(|_| StreamError::protocol("negative integer in reply")),
        other => text(other)?
            .parse()
            .map_err(|_| StreamError::protocol(format!("expected integer, got {other:?}"))),
    }
}

fn parse_entry_id(value: &Value) -> Result<EntryId, StreamError> {
    text(value)?
        .parse()
        .map_err(|e: ripple_events::DecodeError| StreamError::protocol(e.to_string()))
}

/// `[id, [field, value, ...]]`.
///
/// An entry trimmed from the stream while still pending comes back with nil
/// fields. It is returned with no fields so the consumer discards it as
/// malformed and acks it; otherwise it would stay pending forever.
fn parse_entry(value: &Value) -> Result<Option<StreamEntry>, StreamError> {
    let Value::Bulk(parts) = value else {
        return match value {
            Value::Nil => Ok(None),
            other => Err(StreamError::protocol(format!("malformed stream entry: {other:?}"))),
        };
    };
    let [id, fields] = parts.as_slice() else {
        return Err(StreamError::protocol("stream entry is not an [id, fields] pair"));
    };
    let id = parse_entry_id(id)?;
    let Value::Bulk(flat) = fields else {
        return Ok(Some(StreamEntry {
            id,
            fields: WireFields::new(),
        }));
    };

    let mut map = WireFields::new();
    for pair in flat.chunks(2) {
        if let [key, value] = pair {
            map.insert(text(key)?, text(value)?);
        }
    }
    Ok(Some(StreamEntry { id, fields: map }))
}

fn parse_entries(value: &Value) -> Result<Vec<StreamEntry>, StreamError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Bulk(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                if let Some(entry) = parse_entry(entry)? {
                    out.push(entry);
                }
            }
            Ok(out)
        }
        other => Err(StreamError::protocol(format!("expected entry list, got {other:?}"))),
    }
}

/// `XREADGROUP` reply: nil on timeout, else `[[topic, [entry, ...]]]`.
fn parse_read_reply(value: &Value) -> Result<Vec<StreamEntry>, StreamError> {
    let streams = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(streams) => streams,
        other => return Err(StreamError::protocol(format!("unexpected XREADGROUP reply: {other:?}"))),
    };

    let mut out = Vec::new();
    for stream in streams {
        match stream {
            Value::Bulk(parts) if parts.len() == 2 => out.extend(parse_entries(&parts[1])?),
            other => return Err(StreamError::protocol(format!("unexpected stream block: {other:?}"))),
        }
    }
    Ok(out)
}

/// Extended `XPENDING` reply: `[[id, consumer, idle-ms, deliveries], ...]`.
fn parse_pending_reply(value: &Value) -> Result<Vec<PendingEntry>, StreamError> {
    let rows = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(rows) => rows,
        other => return Err(StreamError::protocol(format!("unexpected XPENDING reply: {other:?}"))),
    };

    rows.iter()
        .map(|row| match row {
            Value::Bulk(cols) => match cols.as_slice() {
                [id, consumer, idle, deliveries] => Ok(PendingEntry {
                    id: parse_entry_id(id)?,
                    consumer: text(consumer)?,
                    idle: Duration::from_millis(integer(idle)?),
                    deliveries: integer(deliveries)?,
                }),
                _ => Err(StreamError::protocol("XPENDING row does not have four columns")),
            },
            other => Err(StreamError::protocol(format!("unexpected XPENDING row: {other:?}"))),
        })
        .collect()
}
