//! Publishes for one edge land on a single replica chosen by `edge_id mod n`.

use crate::framework::{check, eventually, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{Context, Result};
use frontier::FrontierOptions;
use frontier_sdk::{EdgeOptions, ServiceClient, ServiceOptions};
use network::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use types::HashPolicy;

pub struct TopicFanoutTest {
    pub edge_id: u64,
    pub messages: u64,
    pub topic: String,
}

impl Default for TopicFanoutTest {
    fn default() -> Self {
        Self {
            edge_id: 5,
            messages: 1000,
            topic: "t".to_string(),
        }
    }
}

fn drain(service: Arc<ServiceClient>, counter: Arc<AtomicU64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = service.receive().await {
            counter.fetch_add(1, Ordering::Relaxed);
            message.done();
        }
    })
}

#[async_trait::async_trait]
impl TestScenario for TopicFanoutTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let gateway = framework.gateway(FrontierOptions {
            hash_by: HashPolicy::EdgeId,
            ..FrontierOptions::default()
        })?;
        let mqm = gateway.frontier.mqm().clone();
        let topic = self.topic.clone();

        // sinks are indexed in registration order, so connect one at a time
        let mut replicas = Vec::new();
        let mut counters = Vec::new();
        let mut drains = Vec::new();
        for (index, name) in ["replica-0", "replica-1"].into_iter().enumerate() {
            let service = Arc::new(
                gateway
                    .service(&ServiceOptions::new(name).with_topics([topic.clone()]))
                    .await?,
            );
            eventually(Duration::from_secs(5), || async { mqm.get_mqs(&topic).len() == index + 1 })
                .await
                .with_context(|| format!("{} never joined the topic", name))?;
            let counter = Arc::new(AtomicU64::new(0));
            drains.push(drain(service.clone(), counter.clone()));
            counters.push(counter);
            replicas.push(service);
        }

        let edge = gateway
            .edge(EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        for n in 0..self.messages {
            edge.publish(Message::new(self.topic.clone(), n.to_be_bytes().to_vec()))
                .await?;
        }

        let chosen = (self.edge_id % replicas.len() as u64) as usize;
        let received: Vec<u64> = counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        let validations = vec![
            check(
                "chosen_replica_got_all",
                received[chosen] == self.messages,
                format!("received {:?}, expected replica {}", received, chosen),
            ),
            check(
                "other_replica_got_none",
                received.iter().sum::<u64>() == self.messages,
                format!("received {:?}", received),
            ),
        ];

        edge.close();
        for replica in &replicas {
            replica.close();
        }
        for task in drains {
            let _ = task.await;
        }
        gateway.shutdown().await;
        Ok(TestResult::from_validations(
            self.name(),
            TestMetrics {
                messages_sent: self.messages,
                messages_received: received.iter().sum(),
                ..TestMetrics::default()
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        "topic_fanout"
    }

    fn description(&self) -> &str {
        "Two replicas share a topic; every publish of one edge reaches the same replica"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
