//! Residents reported by a frontier that stops heartbeating lapse on their own.

use crate::framework::{check, TestFramework, TestMetrics, TestResult, TestScenario, FRONTIER_PLANE};
use anyhow::Result;
use frontlas::Ttls;
use network::{dial, DialOptions, Request};
use std::time::Duration;
use types::{EdgeReport, FrontierMeta, RPC_EDGE_ONLINE};

pub struct LivenessDecayTest {
    pub alive: Duration,
    pub edges: u64,
}

impl Default for LivenessDecayTest {
    fn default() -> Self {
        Self {
            alive: Duration::from_secs(2),
            edges: 3,
        }
    }
}

#[async_trait::async_trait]
impl TestScenario for LivenessDecayTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let ttls = Ttls {
            alive: self.alive,
            ..Ttls::default()
        };
        let cluster = framework.cluster(0, ttls).await?;

        let meta = FrontierMeta {
            frontier_id: "silent".to_string(),
            advertised_sb_addr: "silent.local:30011".to_string(),
            advertised_eb_addr: "silent.local:30012".to_string(),
        };
        let options = DialOptions::default()
            .with_meta(serde_json::to_vec(&meta)?)
            .with_heartbeat_interval(Duration::from_secs(60));
        let plane = dial(&cluster.net, FRONTIER_PLANE, options).await?;

        for edge_id in 1..=self.edges {
            let report = EdgeReport {
                edge_id,
                addr: format!("10.1.0.{}:7000", edge_id),
            };
            plane
                .call(Request::new(RPC_EDGE_ONLINE, serde_json::to_vec(&report)?))
                .await?;
        }
        let locator = cluster.frontlas.locator();
        let before = locator.count_edges().await?;

        tokio::time::sleep(self.alive + Duration::from_millis(500)).await;

        let frontiers = locator.count_frontiers().await?;
        let edges = locator.count_edges().await?;
        let row = locator.get_frontier_by_edge(1).await;
        let listed = locator.list_frontiers(0, 0, &[], &[]).await?;
        let edge_count = listed.frontiers.first().map(|f| f.edge_count);

        let validations = vec![
            check("reported", before == self.edges, format!("{} edges before decay", before)),
            check("frontier_row_kept", frontiers == 1, format!("{} frontiers", frontiers)),
            check("edges_lapsed", edges == 0, format!("{} edges after decay", edges)),
            check("edge_unroutable", row.is_err(), format!("lookup {:?}", row)),
            check(
                "counter_cleared",
                edge_count == Some(0),
                format!("frontier edge_count {:?}", edge_count),
            ),
        ];

        plane.close();
        cluster.shutdown().await;
        Ok(TestResult::from_validations(
            self.name(),
            TestMetrics {
                rpcs: self.edges,
                ..TestMetrics::default()
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        "liveness_decay"
    }

    fn description(&self) -> &str {
        "Edges lapse after the alive ttl when their frontier goes quiet"
    }

    fn timeout(&self) -> Duration {
        self.alive + Duration::from_secs(10)
    }
}
