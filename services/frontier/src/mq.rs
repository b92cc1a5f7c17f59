//! # MQ Manager
//!
//! Topic → sinks index for edge publishes. A sink is anything that accepts
//! `produce(topic, data)`; the one the gateway ships is [`ServiceSink`],
//! which publishes into a connected service.
//!
//! ## Selection
//!
//! `produce` picks one sink with the exchange's hash policy
//! (`edgeid`: `edge_id mod n`, `srcip`: `ipv4 mod n`, `random`). A topic
//! with no sinks falls back to the wildcard topic `*`; when neither has a
//! sink the publish fails with `TopicNotOnline` and the publishing edge sees
//! that error on its message.
//!
//! `get_mq` hands out sinks round-robin with one counter per topic.

use async_trait::async_trait;
use bytes::Bytes;
use network::{Cnss, End, Message};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use types::{append_edge_id, select_index, FrontierError, HashPolicy, Result, WILDCARD_TOPIC};

/// Who produced a message and how it should be carried
#[derive(Debug, Clone, Default)]
pub struct ProduceOptions {
    pub edge_id: u64,
    /// Remote address of the publishing edge
    pub addr: String,
    pub custom: Bytes,
    pub cnss: Cnss,
}

/// Destination of edge publishes
#[async_trait]
pub trait MqSink: Send + Sync + 'static {
    /// Identity used to deduplicate registrations
    fn key(&self) -> usize;

    fn name(&self) -> &str;

    async fn produce(&self, topic: &str, data: Bytes, options: &ProduceOptions) -> Result<()>;
}

/// Publishes into a service end, tagging `custom` with the originating edge
pub struct ServiceSink {
    end: End,
    name: String,
}

impl ServiceSink {
    pub fn new(end: End, name: impl Into<String>) -> Self {
        Self {
            end,
            name: name.into(),
        }
    }
}

#[async_trait]
impl MqSink for ServiceSink {
    /// Compares by underlying connection
    fn key(&self) -> usize {
        self.end.key()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, topic: &str, data: Bytes, options: &ProduceOptions) -> Result<()> {
        let message = Message::new(topic, data)
            .with_custom(append_edge_id(&options.custom, options.edge_id))
            .with_cnss(options.cnss);
        Ok(self.end.publish(message).await?)
    }
}

#[derive(Default)]
struct TopicSinks {
    sinks: Vec<Arc<dyn MqSink>>,
    next: AtomicUsize,
}

pub struct MqManager {
    topics: RwLock<HashMap<String, TopicSinks>>,
    hash_by: HashPolicy,
    produce_timeout: Duration,
}

impl MqManager {
    pub fn new(hash_by: HashPolicy, produce_timeout: Duration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            hash_by,
            produce_timeout,
        }
    }

    /// Register `sink` for every topic in `topics`
    pub fn add_mq(&self, topics: &[String], sink: Arc<dyn MqSink>) {
        let mut index = self.topics.write();
        for topic in topics {
            let entry = index.entry(topic.clone()).or_default();
            if entry.sinks.iter().any(|s| s.key() == sink.key()) {
                continue;
            }
            debug!(topic = %topic, sink = sink.name(), "mq added");
            entry.sinks.push(sink.clone());
        }
    }

    /// Remove `sink` from every topic
    pub fn del_mq(&self, sink_key: usize) {
        let mut index = self.topics.write();
        index.retain(|topic, entry| {
            entry.sinks.retain(|s| {
                let keep = s.key() != sink_key;
                if !keep {
                    debug!(topic = %topic, sink = s.name(), "mq removed");
                }
                keep
            });
            !entry.sinks.is_empty()
        });
    }

    /// One sink for `topic`, round-robin
    pub fn get_mq(&self, topic: &str) -> Option<Arc<dyn MqSink>> {
        let index = self.topics.read();
        let entry = index.get(topic)?;
        if entry.sinks.is_empty() {
            return None;
        }
        let n = entry.next.fetch_add(1, Ordering::Relaxed);
        Some(entry.sinks[n % entry.sinks.len()].clone())
    }

    /// Every sink registered for `topic`, in registration order
    pub fn get_mqs(&self, topic: &str) -> Vec<Arc<dyn MqSink>> {
        self.topics
            .read()
            .get(topic)
            .map(|entry| entry.sinks.clone())
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    /// Hand `data` to one sink of `topic`
    pub async fn produce(&self, topic: &str, data: Bytes, options: &ProduceOptions) -> Result<()> {
        let mut sinks = self.get_mqs(topic);
        if sinks.is_empty() {
            sinks = self.get_mqs(WILDCARD_TOPIC);
        }
        if sinks.is_empty() {
            return Err(FrontierError::TopicNotOnline);
        }

        let index = select_index(self.hash_by, sinks.len(), options.edge_id, &options.addr);
        let sink = &sinks[index];
        trace!(topic, edge_id = options.edge_id, sink = sink.name(), "produce");

        let timeout_ms = self.produce_timeout.as_millis();
        tokio::time::timeout(self.produce_timeout, sink.produce(topic, data, options))
            .await
            .map_err(|_| FrontierError::Timeout(format!("produce exceeded {}ms", timeout_ms)))?
    }
}
