//! In-memory durable transport for tests/dev.
//!
//! - Single append-only log shared by all consumers
//! - Per-consumer cursor and pending set (ack wait, nak, max deliver)
//! - Time is read from `tokio::time`, so paused-clock tests drive expiry

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::envelope::EventEnvelope;
use crate::transport::{ConsumerConfig, Delivery, Transport, TransportError};

#[derive(Debug, Clone)]
struct StoredMessage {
    subject: String,
    data: Vec<u8>,
}

#[derive(Debug)]
struct PendingEntry {
    deliveries: u32,
    redeliver_at: Instant,
}

#[derive(Debug, Default)]
struct ConsumerState {
    cursor: usize,
    pending: BTreeMap<usize, PendingEntry>,
}

#[derive(Debug, Default)]
struct State {
    log: Vec<StoredMessage>,
    consumers: HashMap<String, ConsumerState>,
    failing_appends: u32,
    dropped: u64,
    closed: bool,
}

impl State {
    fn collect(&mut self, consumer: &ConsumerConfig, batch: usize, now: Instant) -> Vec<Delivery> {
        let State {
            log,
            consumers,
            dropped,
            ..
        } = self;
        let cs = consumers.entry(consumer.name.clone()).or_default();
        let mut out = Vec::new();

        let due: Vec<usize> = cs
            .pending
            .iter()
            .filter(|(_, p)| p.redeliver_at <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in due {
            if out.len() >= batch {
                break;
            }
            let Some(msg) = log.get(seq) else {
                cs.pending.remove(&seq);
                continue;
            };
            let Some(entry) = cs.pending.get_mut(&seq) else {
                continue;
            };
            if entry.deliveries >= consumer.max_deliver {
                let deliveries = entry.deliveries;
                cs.pending.remove(&seq);
                *dropped += 1;
                warn!(
                    consumer = %consumer.name,
                    sequence = seq,
                    deliveries,
                    "max deliveries reached, dropping message"
                );
                continue;
            }
            entry.deliveries += 1;
            entry.redeliver_at = now + consumer.ack_wait;
            out.push(Delivery {
                id: seq.to_string(),
                subject: msg.subject.clone(),
                data: msg.data.clone(),
                delivery_count: entry.deliveries,
            });
        }

        while out.len() < batch && cs.cursor < log.len() {
            let seq = cs.cursor;
            cs.cursor += 1;
            let msg = &log[seq];
            if !consumer.accepts(&msg.subject) {
                continue;
            }
            cs.pending.insert(
                seq,
                PendingEntry {
                    deliveries: 1,
                    redeliver_at: now + consumer.ack_wait,
                },
            );
            out.push(Delivery {
                id: seq.to_string(),
                subject: msg.subject.clone(),
                data: msg.data.clone(),
                delivery_count: 1,
            });
        }

        out
    }

    fn next_redelivery(&self, consumer: &str) -> Option<Instant> {
        self.consumers
            .get(consumer)?
            .pending
            .values()
            .map(|p| p.redeliver_at)
            .min()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransport {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("in-memory transport lock poisoned".into()))
    }

    /// Make the next `n` appends fail with [`TransportError::Unavailable`].
    pub fn fail_next_appends(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_appends = n;
        }
    }

    /// Reject all further operations with [`TransportError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored messages whose subject matches `pattern`, decoded as envelopes.
    ///
    /// Messages that are not valid envelopes are skipped.
    pub fn envelopes(&self, pattern: &str) -> Vec<EventEnvelope> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .log
            .iter()
            .filter(|m| crate::subject::matches(pattern, &m.subject))
            .filter_map(|m| EventEnvelope::from_json(&m.data).ok())
            .collect()
    }

    /// Deliveries currently awaiting ack for `consumer`.
    pub fn pending(&self, consumer: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.consumers.get(consumer).map(|c| c.pending.len()))
            .unwrap_or(0)
    }

    /// Messages given up on after reaching max deliver.
    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|s| s.dropped).unwrap_or(0)
    }

    fn sequence(delivery: &Delivery) -> Result<usize, TransportError> {
        delivery
            .id
            .parse()
            .map_err(|_| TransportError::Codec(format!("unknown delivery id: {}", delivery.id)))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn append(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.failing_appends > 0 {
                state.failing_appends -= 1;
                return Err(TransportError::Unavailable("injected append failure".into()));
            }
            state.log.push(StoredMessage {
                subject: subject.to_string(),
                data,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(
        &self,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, TransportError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let next_redelivery = {
                let mut state = self.lock()?;
                if state.closed {
                    return Err(TransportError::Closed);
                }
                let out = state.collect(consumer, batch.max(1), Instant::now());
                if !out.is_empty() {
                    return Ok(out);
                }
                state.next_redelivery(&consumer.name)
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake = next_redelivery.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn ack(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        let seq = Self::sequence(delivery)?;
        let mut state = self.lock()?;
        if let Some(cs) = state.consumers.get_mut(&consumer.name) {
            cs.pending.remove(&seq);
        }
        Ok(())
    }

    async fn nak(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        let seq = Self::sequence(delivery)?;
        {
            let mut state = self.lock()?;
            if let Some(entry) = state
                .consumers
                .get_mut(&consumer.name)
                .and_then(|cs| cs.pending.get_mut(&seq))
            {
                entry.redeliver_at = Instant::now();
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
