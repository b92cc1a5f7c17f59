//! A second connection with the same edge id displaces the first.

use crate::framework::{check, eventually, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{Context, Result};
use frontier::FrontierOptions;
use frontier_sdk::EdgeOptions;
use repository::EdgeQuery;
use std::time::Duration;

pub struct ReconnectDisplacesTest {
    pub edge_id: u64,
}

impl Default for ReconnectDisplacesTest {
    fn default() -> Self {
        Self { edge_id: 7 }
    }
}

#[async_trait::async_trait]
impl TestScenario for ReconnectDisplacesTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let gateway = framework.gateway(FrontierOptions::default())?;
        let control = gateway.frontier.control().clone();
        let query = EdgeQuery {
            edge_id: Some(self.edge_id),
            ..EdgeQuery::default()
        };

        let first = gateway
            .edge(EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        eventually(Duration::from_secs(5), || async {
            control.list_edges(&query).map(|rows| rows.len() == 1).unwrap_or(false)
        })
        .await
        .context("first edge never came online")?;
        let first_addr = control.list_edges(&query)?[0].addr.clone();

        let second = gateway
            .edge(EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        let displaced = tokio::time::timeout(Duration::from_secs(5), first.closed())
            .await
            .is_ok();
        eventually(Duration::from_secs(5), || async {
            control
                .list_edges(&query)
                .map(|rows| rows.len() == 1 && rows[0].addr != first_addr)
                .unwrap_or(false)
        })
        .await
        .context("second edge never replaced the first")?;
        let rows = control.list_edges(&query)?;

        let validations = vec![
            check("first_closed", displaced, "first connection closed"),
            check("second_live", !second.end().is_closed(), "second connection open"),
            check(
                "single_row",
                rows.len() == 1 && rows[0].addr != first_addr,
                format!("rows {:?}", rows),
            ),
        ];

        second.close();
        gateway.shutdown().await;
        Ok(TestResult::from_validations(self.name(), TestMetrics::default(), validations))
    }

    fn name(&self) -> &str {
        "reconnect_displaces"
    }

    fn description(&self) -> &str {
        "A reconnect with a live edge id closes the predecessor and keeps one row"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }
}
