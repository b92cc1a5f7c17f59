//! A cluster service reaches an edge on whichever frontier holds it.

use crate::framework::{check, eventually, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{anyhow, Context, Result};
use frontier_sdk::{ClusterService, ConnectorDialer, EdgeOptions, HttpLocator, ServiceOptions};
use frontlas::Ttls;
use network::{handler_fn, Message, Request, Response};
use std::sync::Arc;
use std::time::Duration;

pub struct ClusterRoutingTest {
    pub edge_id: u64,
    /// Index of the member the edge connects to
    pub member: usize,
}

impl Default for ClusterRoutingTest {
    fn default() -> Self {
        Self {
            edge_id: 1001,
            member: 1,
        }
    }
}

#[async_trait::async_trait]
impl TestScenario for ClusterRoutingTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let cluster = framework.cluster(2, Ttls::default()).await?;
        let home = cluster
            .members
            .get(self.member)
            .map(|m| m.frontier_id.clone())
            .ok_or_else(|| anyhow!("no member {}", self.member))?;

        let edge = cluster
            .edge(self.member, EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        let answer = home.clone();
        edge.register(
            "whoami",
            handler_fn(move |_request: Request| {
                let answer = answer.clone();
                async move { Response::ok(answer) }
            }),
        )?;

        let locator = cluster.frontlas.locator();
        eventually(Duration::from_secs(5), || async {
            locator.get_edge(self.edge_id).await.is_ok()
        })
        .await
        .context("edge never reached frontlas")?;

        let service = ClusterService::new(
            Arc::new(HttpLocator::new(cluster.api_base()?)),
            Arc::new(ConnectorDialer::new(
                Arc::new(cluster.net.clone()),
                ServiceOptions::new("cluster-svc"),
            )),
        );
        service.update().await?;
        let mut connected = service.frontiers();
        connected.sort();

        let response = service.call(self.edge_id, Request::new("whoami", "")).await?;

        let receiving = {
            let edge = edge.clone();
            tokio::spawn(async move {
                let message = edge.receive().await?;
                let data = message.data().clone();
                message.done();
                Some(data)
            })
        };
        service
            .publish(self.edge_id, Message::new("cluster", &b"routed"[..]))
            .await?;
        let published = receiving.await?;

        let validations = vec![
            check(
                "connected_to_all",
                connected == vec!["frontier-0".to_string(), "frontier-1".to_string()],
                format!("connected to {:?}", connected),
            ),
            check(
                "call_routed",
                response.data == home.as_bytes(),
                format!("answered by {:?}", response.data),
            ),
            check(
                "publish_routed",
                published.as_deref() == Some(&b"routed"[..]),
                format!("edge received {:?}", published),
            ),
        ];

        service.close();
        edge.close();
        cluster.shutdown().await;
        Ok(TestResult::from_validations(
            self.name(),
            TestMetrics {
                messages_sent: 1,
                messages_received: 1,
                rpcs: 1,
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        "cluster_routing"
    }

    fn description(&self) -> &str {
        "Cluster service locates an edge through frontlas and routes to its frontier"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}
