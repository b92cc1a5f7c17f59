//! A service publish addressed to an edge arrives with the tag stripped.

use crate::framework::{check, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{anyhow, Result};
use frontier::FrontierOptions;
use frontier_sdk::{EdgeOptions, ServiceOptions};
use network::Message;
use std::time::Duration;

pub struct ReversePublishTest {
    pub edge_id: u64,
}

impl Default for ReversePublishTest {
    fn default() -> Self {
        Self { edge_id: 3 }
    }
}

#[async_trait::async_trait]
impl TestScenario for ReversePublishTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let gateway = framework.gateway(FrontierOptions::default())?;
        let edge = gateway
            .edge(EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        let service = gateway.service(&ServiceOptions::new("notifier")).await?;

        let receiving = {
            let edge = edge.clone();
            tokio::spawn(async move {
                let message = edge.receive().await?;
                let seen = (message.topic().to_string(), message.data().clone(), message.custom().clone());
                message.done();
                Some(seen)
            })
        };
        service
            .publish(
                self.edge_id,
                Message::new("alerts", &b"payload"[..]).with_custom(&b"hdr"[..]),
            )
            .await?;
        let (topic, data, custom) = receiving
            .await?
            .ok_or_else(|| anyhow!("edge stream closed before the message"))?;

        let validations = vec![
            check("topic", topic == "alerts", format!("topic {:?}", topic)),
            check("payload", data == &b"payload"[..], format!("data {:?}", data)),
            check("tag_stripped", custom == &b"hdr"[..], format!("custom {:?}", custom)),
        ];

        edge.close();
        service.close();
        gateway.shutdown().await;
        Ok(TestResult::from_validations(
            self.name(),
            TestMetrics {
                messages_sent: 1,
                messages_received: 1,
                ..TestMetrics::default()
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        "reverse_publish"
    }

    fn description(&self) -> &str {
        "Service publishes to an edge id; the edge receives the payload without the tag"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}
