//! An edge RPC reaches the service, tagged with the caller's edge id.

use crate::framework::{check, TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::Result;
use frontier::FrontierOptions;
use frontier_sdk::{service_fn, EdgeOptions, ServiceOptions};
use network::{Request, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct EdgeRoundTripTest {
    pub edge_id: u64,
    pub payload: String,
}

impl Default for EdgeRoundTripTest {
    fn default() -> Self {
        Self {
            edge_id: 42,
            payload: "hi".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TestScenario for EdgeRoundTripTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let gateway = framework.gateway(FrontierOptions::default())?;
        let service = gateway.service(&ServiceOptions::new("echo-service")).await?;
        let observed = Arc::new(Mutex::new(Vec::new()));
        let seen = observed.clone();
        service.register(
            "echo",
            service_fn(move |edge_id, request: Request| {
                seen.lock().push(edge_id);
                async move { Response::ok(request.data) }
            }),
        )?;
        gateway.wait_for_rpc("echo").await?;

        let edge = gateway
            .edge(EdgeOptions::default().with_edge_id(self.edge_id))
            .await?;
        let response = edge.call(Request::new("echo", self.payload.clone())).await?;

        let observed = observed.lock().clone();
        let validations = vec![
            check(
                "response_echoed",
                response.data == self.payload.as_bytes(),
                format!("response {:?}", response.data),
            ),
            check(
                "edge_id_observed",
                observed == vec![self.edge_id],
                format!("handler saw {:?}", observed),
            ),
        ];

        edge.close();
        service.close();
        gateway.shutdown().await;
        Ok(TestResult::from_validations(
            self.name(),
            TestMetrics {
                rpcs: 1,
                ..TestMetrics::default()
            },
            validations,
        ))
    }

    fn name(&self) -> &str {
        "edge_round_trip"
    }

    fn description(&self) -> &str {
        "Edge calls a service RPC through the gateway and the service sees the edge id"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}
