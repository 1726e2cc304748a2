//! Redis Streams-backed [`Transport`] (durable, at-least-once delivery).
//!
//! - **Stream key**: one stream for every subject (`ddmrp:events` by default).
//!   Each entry carries `subject` and `data` fields.
//! - **Consumer groups**: one per durable consumer name, created on first use.
//! - **Pending entries**: a fetched entry stays in the group's pending list
//!   until XACK. Entries idle longer than `ack_wait` are reclaimed (XCLAIM)
//!   and redelivered; entries that already reached `max_deliver` are acked
//!   and dropped with a warning.
//! - **Nak**: resets the entry's idle time so the next fetch reclaims it.
//! - **Filters**: entries outside the consumer's subject filters are acked
//!   straight away.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use ddmrp_events::{ConsumerConfig, Delivery, Transport, TransportError};

use crate::config::DEFAULT_STREAM_KEY;

const FIELD_SUBJECT: &str = "subject";
const FIELD_DATA: &str = "data";

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("malformed stream entry: {0}")]
    Malformed(String),
}

impl From<RedisStreamsError> for TransportError {
    fn from(e: RedisStreamsError) -> Self {
        match e {
            RedisStreamsError::Malformed(m) => TransportError::Codec(m),
            other => TransportError::Unavailable(other.to_string()),
        }
    }
}

/// One stream entry, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamEntry {
    id: String,
    subject: String,
    data: Vec<u8>,
}

pub struct RedisStreamsTransport {
    client: redis::Client,
    stream_key: String,
    /// Member name inside every consumer group.
    worker: String,
    groups: Mutex<HashSet<String>>,
}

impl RedisStreamsTransport {
    pub fn new(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            worker: format!("worker-{}", uuid::Uuid::now_v7()),
            groups: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_worker_name(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisStreamsError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// XGROUP CREATE ... MKSTREAM once per group; BUSYGROUP means it exists.
    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        group: &str,
    ) -> Result<(), RedisStreamsError> {
        if self.groups.lock().map(|g| g.contains(group)).unwrap_or(false) {
            return Ok(());
        }

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(_) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }

        if let Ok(mut groups) = self.groups.lock() {
            groups.insert(group.to_string());
        }
        Ok(())
    }

    async fn xack(
        &self,
        conn: &mut MultiplexedConnection,
        group: &str,
        ids: &[String],
    ) -> Result<(), RedisStreamsError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(group)
            .arg(ids)
            .query_async(conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Reclaim entries idle past `ack_wait`, dropping those out of attempts.
    async fn reclaim(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &ConsumerConfig,
        count: usize,
    ) -> Result<Vec<(StreamEntry, u32)>, RedisStreamsError> {
        let min_idle_ms = consumer.ack_wait.as_millis().to_string();

        // XPENDING key group IDLE ms - + count -> [id, owner, idle, deliveries]
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&consumer.name)
            .arg("IDLE")
            .arg(&min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let (exhausted, retry): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(_, _, _, deliveries)| *deliveries >= u64::from(consumer.max_deliver));

        if !exhausted.is_empty() {
            let ids: Vec<String> = exhausted.into_iter().map(|(id, ..)| id).collect();
            for id in &ids {
                warn!(
                    stream_key = %self.stream_key,
                    consumer = %consumer.name,
                    message_id = %id,
                    max_deliver = consumer.max_deliver,
                    "delivery attempts exhausted, dropping message"
                );
            }
            self.xack(conn, &consumer.name, &ids).await?;
        }

        if retry.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = retry.iter().map(|(id, ..)| id.as_str()).collect();
        let claimed: Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&consumer.name)
            .arg(&self.worker)
            .arg(&min_idle_ms)
            .arg(&ids)
            .query_async(conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        let entries = parse_entries(claimed)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let previous = retry
                    .iter()
                    .find(|(id, ..)| *id == entry.id)
                    .map(|(_, _, _, deliveries)| *deliveries)
                    .unwrap_or(0);
                let count = u32::try_from(previous + 1).unwrap_or(u32::MAX);
                (entry, count)
            })
            .collect())
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &ConsumerConfig,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        // BLOCK 0 would wait forever.
        let block_ms = wait.as_millis().max(1).to_string();

        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&consumer.name)
            .arg(&self.worker)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(&block_ms)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        parse_read_reply(reply, &self.stream_key)
    }
}

#[async_trait]
impl Transport for RedisStreamsTransport {
    #[instrument(skip(self, data), fields(stream_key = %self.stream_key), err)]
    async fn append(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(FIELD_SUBJECT)
            .arg(subject)
            .arg(FIELD_DATA)
            .arg(data)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    async fn fetch(
        &self,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, TransportError> {
        let batch = batch.max(1);
        let mut conn = self.connection().await?;
        self.ensure_group(&mut conn, &consumer.name).await?;

        let mut entries = self.reclaim(&mut conn, consumer, batch).await?;
        if entries.len() < batch {
            let fresh = self
                .read_new(&mut conn, consumer, batch - entries.len(), wait)
                .await?;
            entries.extend(fresh.into_iter().map(|e| (e, 1)));
        }

        let mut filtered_out = Vec::new();
        let mut deliveries = Vec::with_capacity(entries.len());
        for (entry, delivery_count) in entries {
            if consumer.accepts(&entry.subject) {
                deliveries.push(Delivery {
                    id: entry.id,
                    subject: entry.subject,
                    data: entry.data,
                    delivery_count,
                });
            } else {
                filtered_out.push(entry.id);
            }
        }
        if !filtered_out.is_empty() {
            debug!(consumer = %consumer.name, skipped = filtered_out.len(), "acking entries outside filter");
            self.xack(&mut conn, &consumer.name, &filtered_out).await?;
        }

        Ok(deliveries)
    }

    async fn ack(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        self.xack(&mut conn, &consumer.name, std::slice::from_ref(&delivery.id))
            .await?;
        Ok(())
    }

    async fn nak(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        // JUSTID keeps the delivery counter; IDLE makes the entry reclaimable now.
        let _: Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&consumer.name)
            .arg(&self.worker)
            .arg(0)
            .arg(&delivery.id)
            .arg("IDLE")
            .arg(consumer.ack_wait.as_millis().to_string())
            .arg("JUSTID")
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM (nak) failed: {e}")))?;
        Ok(())
    }
}

/// XREADGROUP reply: `[[stream, [entry, ...]], ...]`, or nil on timeout.
fn parse_read_reply(reply: Value, stream_key: &str) -> Result<Vec<StreamEntry>, RedisStreamsError> {
    let streams = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(streams) => streams,
        other => return Err(RedisStreamsError::Malformed(format!("unexpected XREADGROUP reply: {other:?}"))),
    };

    for stream in streams {
        let Value::Bulk(mut parts) = stream else {
            return Err(RedisStreamsError::Malformed("stream reply is not an array".into()));
        };
        if parts.len() != 2 {
            return Err(RedisStreamsError::Malformed("stream reply is not [key, entries]".into()));
        }
        let entries = parts.pop().unwrap_or(Value::Nil);
        let key = parts.pop().unwrap_or(Value::Nil);
        if as_string(&key).as_deref() == Some(stream_key) {
            return parse_entries(entries);
        }
    }
    Ok(Vec::new())
}

/// `[[id, [field, value, ...]], ...]`; nil entries (trimmed) are skipped.
fn parse_entries(value: Value) -> Result<Vec<StreamEntry>, RedisStreamsError> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(items) => items,
        other => return Err(RedisStreamsError::Malformed(format!("unexpected entry list: {other:?}"))),
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Nil => continue,
            Value::Bulk(parts) => entries.push(parse_entry(parts)?),
            other => return Err(RedisStreamsError::Malformed(format!("unexpected entry: {other:?}"))),
        }
    }
    Ok(entries)
}

fn parse_entry(parts: Vec<Value>) -> Result<StreamEntry, RedisStreamsError> {
    let [id, fields]: [Value; 2] = parts
        .try_into()
        .map_err(|_| RedisStreamsError::Malformed("entry is not [id, fields]".into()))?;

    let id = as_string(&id).ok_or_else(|| RedisStreamsError::Malformed("invalid message id".into()))?;
    let Value::Bulk(fields) = fields else {
        return Err(RedisStreamsError::Malformed(format!("{id}: fields are not an array")));
    };

    let mut subject = None;
    let mut data = None;
    for pair in fields.chunks(2) {
        if let [Value::Data(key), Value::Data(value)] = pair {
            match key.as_slice() {
                k if k == FIELD_SUBJECT.as_bytes() => {
                    subject = Some(String::from_utf8_lossy(value).into_owned());
                }
                k if k == FIELD_DATA.as_bytes() => data = Some(value.clone()),
                _ => {}
            }
        }
    }

    Ok(StreamEntry {
        subject: subject.ok_or_else(|| RedisStreamsError::Malformed(format!("{id}: missing subject")))?,
        data: data.ok_or_else(|| RedisStreamsError::Malformed(format!("{id}: missing data")))?,
        id,
    })
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, subject: &str, payload: &str) -> Value {
        Value::Bulk(vec![
            data(id),
            Value::Bulk(vec![data(FIELD_SUBJECT), data(subject), data(FIELD_DATA), data(payload)]),
        ])
    }

    #[test]
    fn parses_read_group_reply_for_own_stream() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data(DEFAULT_STREAM_KEY),
            Value::Bulk(vec![
                entry("1-0", "ddmrp.buffer.calculated", "{}"),
                entry("2-0", "ddmrp.fad.created", "{\"a\":1}"),
            ]),
        ])]);

        let entries = parse_read_reply(reply, DEFAULT_STREAM_KEY).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, "2-0");
        assert_eq!(entries[1].subject, "ddmrp.fad.created");
        assert_eq!(entries[1].data, b"{\"a\":1}".to_vec());
    }

    #[test]
    fn timeout_reply_is_empty() {
        assert!(parse_read_reply(Value::Nil, DEFAULT_STREAM_KEY).unwrap().is_empty());
    }

    #[test]
    fn trimmed_claims_are_skipped() {
        let claimed = Value::Bulk(vec![Value::Nil, entry("3-0", "ddmrp.fad.deleted", "{}")]);
        let entries = parse_entries(claimed).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "3-0");
    }

    #[test]
    fn entry_without_subject_is_malformed() {
        let bad = Value::Bulk(vec![Value::Bulk(vec![
            data("4-0"),
            Value::Bulk(vec![data(FIELD_DATA), data("{}")]),
        ])]);
        let err = parse_entries(bad).unwrap_err();
        assert!(matches!(TransportError::from(err), TransportError::Codec(_)));
    }
}
