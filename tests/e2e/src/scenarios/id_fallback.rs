//! Without an id service the gateway allocates edge ids only when allowed.

use crate::framework::{check, eventually, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{Context, Result};
use frontier::{EdgeboundOptions, FrontierOptions};
use frontier_sdk::{EdgeOptions, ServiceOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use types::{EdgeEvent, RPC_EDGE_ONLINE};

#[derive(Default)]
pub struct IdFallbackTest;

fn options(allocate: bool) -> FrontierOptions {
    FrontierOptions {
        edgebound: EdgeboundOptions {
            edgeid_alloc_when_no_idservice_on: allocate,
            ..EdgeboundOptions::default()
        },
        ..FrontierOptions::default()
    }
}

#[async_trait::async_trait]
impl TestScenario for IdFallbackTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let mut validations = Vec::new();

        let allowing = framework.gateway(options(true))?;
        let watcher = allowing.service(&ServiceOptions::new("presence")).await?;
        let events: Arc<Mutex<Vec<EdgeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        watcher.on_edge_online(move |event| {
            sink.lock().push(event);
            async { Ok(()) }
        })?;
        allowing.wait_for_rpc(RPC_EDGE_ONLINE).await?;

        let edge = allowing.edge(EdgeOptions::default()).await?;
        let edge_id = edge.edge_id();
        eventually(Duration::from_secs(5), || async { !events.lock().is_empty() })
            .await
            .context("edge_online never fired")?;
        let seen: Vec<u64> = events.lock().iter().map(|e| e.edge_id).collect();
        validations.push(check("allocated", edge_id > 0, format!("edge id {}", edge_id)));
        validations.push(check(
            "online_event",
            seen == vec![edge_id],
            format!("online events for {:?}", seen),
        ));
        edge.close();
        watcher.close();
        allowing.shutdown().await;

        let refusing = framework.gateway(options(false))?;
        let refused = refusing.edge(EdgeOptions::default()).await;
        validations.push(check(
            "refused_without_policy",
            refused.is_err(),
            format!("handshake result {:?}", refused.as_ref().map(|e| e.edge_id())),
        ));
        refusing.shutdown().await;

        Ok(TestResult::from_validations(self.name(), TestMetrics::default(), validations))
    }

    fn name(&self) -> &str {
        "id_fallback"
    }

    fn description(&self) -> &str {
        "Local edge id allocation follows edgeid_alloc_when_no_idservice_on"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }
}
