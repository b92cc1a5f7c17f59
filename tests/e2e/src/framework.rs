//! Core E2E testing framework

use anyhow::{anyhow, Context, Result};
use frontier::{Frontier, FrontierOptions, FrontlasInformer, FrontlasInformerOptions, Informer};
use frontier_sdk::{EdgeClient, EdgeOptions, ServiceClient, ServiceOptions};
use frontlas::{Frontlas, MemoryStore, Ttls};
use network::MemoryNetwork;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use types::FrontierMeta;

/// Main test framework coordinator
pub struct TestFramework {
    config: TestConfig,
    run_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Upper bound for one scenario, in seconds
    pub timeout_secs: u64,
    /// Close gateways after each scenario
    pub cleanup: bool,
    pub verbose: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            cleanup: true,
            verbose: false,
        }
    }
}

/// Test scenario trait
#[async_trait::async_trait]
pub trait TestScenario {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult>;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn timeout(&self) -> Duration;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_name: String,
    pub success: bool,
    pub duration: Duration,
    pub error_message: Option<String>,
    pub metrics: TestMetrics,
    pub validation_results: Vec<ValidationResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub rpcs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator: String,
    pub passed: bool,
    pub message: String,
}

impl TestResult {
    /// A result whose success is the conjunction of its validations
    pub fn from_validations(name: &str, metrics: TestMetrics, validations: Vec<ValidationResult>) -> Self {
        Self {
            scenario_name: name.to_string(),
            success: validations.iter().all(|v| v.passed),
            duration: Duration::ZERO,
            error_message: None,
            metrics,
            validation_results: validations,
        }
    }

    fn failed(name: &str, message: String) -> Self {
        Self {
            scenario_name: name.to_string(),
            success: false,
            duration: Duration::ZERO,
            error_message: Some(message),
            metrics: TestMetrics::default(),
            validation_results: vec![],
        }
    }
}

/// Record a named check
pub fn check(validator: &str, passed: bool, message: impl Into<String>) -> ValidationResult {
    ValidationResult {
        validator: validator.to_string(),
        passed,
        message: message.into(),
    }
}

impl TestFramework {
    pub fn new(config: TestConfig) -> Self {
        Self {
            config,
            run_id: rand::random(),
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Run a complete test scenario
    pub async fn run_scenario<S: TestScenario>(&self, scenario: &S) -> TestResult {
        info!(scenario = scenario.name(), run_id = self.run_id, "starting scenario");
        info!("Description: {}", scenario.description());
        let start_time = Instant::now();

        let limit = scenario.timeout().min(Duration::from_secs(self.config.timeout_secs));
        let mut result = match tokio::time::timeout(limit, scenario.execute(self)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(scenario = scenario.name(), error = %e, "scenario failed");
                TestResult::failed(scenario.name(), format!("Execution failed: {:#}", e))
            }
            Err(_) => {
                error!(scenario = scenario.name(), "scenario timed out");
                TestResult::failed(scenario.name(), "Test execution timed out".to_string())
            }
        };
        result.duration = start_time.elapsed();

        for failed in result.validation_results.iter().filter(|v| !v.passed) {
            warn!(scenario = scenario.name(), validator = %failed.validator, message = %failed.message, "validation failed");
        }
        info!(scenario = scenario.name(), success = result.success, "scenario completed");
        result
    }

    /// One gateway over a fresh in-memory network
    pub fn gateway(&self, options: FrontierOptions) -> Result<Gateway> {
        let net = MemoryNetwork::new();
        let frontier = start_frontier(&net, "", options, None)?;
        Ok(Gateway {
            net,
            frontier,
            cleanup: self.config.cleanup,
        })
    }

    /// A Frontlas instance plus `size` reporting gateways on one network
    pub async fn cluster(&self, size: usize, ttls: Ttls) -> Result<Cluster> {
        let net = MemoryNetwork::new();
        let plane = net.listen(FRONTIER_PLANE)?;
        let frontlas = Frontlas::start(
            Arc::new(MemoryStore::new(ttls)),
            plane,
            Some("127.0.0.1:0".parse()?),
        )?;

        let mut members = Vec::with_capacity(size);
        for index in 0..size {
            let frontier_id = format!("frontier-{}", index);
            let prefix = format!("{}-", frontier_id);
            let informer = Arc::new(FrontlasInformer::start(
                Arc::new(net.clone()),
                FrontlasInformerOptions {
                    addrs: vec![FRONTIER_PLANE.to_string()],
                    meta: FrontierMeta {
                        frontier_id: frontier_id.clone(),
                        advertised_sb_addr: format!("{}servicebound", prefix),
                        advertised_eb_addr: format!("{}edgebound", prefix),
                    },
                    heartbeat_interval: Duration::from_secs(1),
                },
            ));
            let reporting = informer.clone() as Arc<dyn Informer>;
            let frontier = start_frontier(&net, &prefix, FrontierOptions::default(), Some(reporting))?;
            members.push(ClusterMember {
                frontier_id,
                prefix,
                frontier,
                informer,
            });
        }

        let cluster = Cluster {
            net,
            frontlas,
            members,
        };
        let frontlas = &cluster.frontlas;
        eventually(Duration::from_secs(5), || async {
            frontlas.plane().frontier_ids().len() == size
        })
        .await
        .context("frontiers did not register with frontlas")?;
        Ok(cluster)
    }
}

pub const FRONTIER_PLANE: &str = "frontier_plane";

fn start_frontier(
    net: &MemoryNetwork,
    prefix: &str,
    options: FrontierOptions,
    informer: Option<Arc<dyn Informer>>,
) -> Result<Frontier> {
    let edges = net.listen(&format!("{}edgebound", prefix))?;
    let services = net.listen(&format!("{}servicebound", prefix))?;
    Ok(Frontier::start(options, edges, services, informer)?)
}

/// Poll `condition` every 10 ms until it holds or `limit` passes
pub async fn eventually<F, Fut>(limit: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("condition not reached within {:?}", limit))
}

/// One gateway and the network its clients dial
pub struct Gateway {
    pub net: MemoryNetwork,
    pub frontier: Frontier,
    cleanup: bool,
}

impl Gateway {
    pub async fn edge(&self, options: EdgeOptions) -> Result<EdgeClient> {
        Ok(EdgeClient::dial(&self.net, "edgebound", options).await?)
    }

    pub async fn service(&self, options: &ServiceOptions) -> Result<ServiceClient> {
        Ok(ServiceClient::dial(&self.net, "servicebound", options).await?)
    }

    /// Wait until some service serves `rpc`
    pub async fn wait_for_rpc(&self, rpc: &str) -> Result<()> {
        let servicebound = self.frontier.servicebound();
        eventually(Duration::from_secs(5), || async {
            servicebound
                .get_services_by_rpc(rpc)
                .map(|services| !services.is_empty())
                .unwrap_or(false)
        })
        .await
        .with_context(|| format!("rpc {} never came online", rpc))
    }

    pub async fn shutdown(self) {
        if self.cleanup {
            self.frontier.close().await;
        }
    }
}

pub struct ClusterMember {
    pub frontier_id: String,
    /// Listener name prefix on the shared network
    pub prefix: String,
    pub frontier: Frontier,
    pub informer: Arc<FrontlasInformer>,
}

/// Frontlas and its gateways on one in-memory network
pub struct Cluster {
    pub net: MemoryNetwork,
    pub frontlas: Frontlas,
    pub members: Vec<ClusterMember>,
}

impl Cluster {
    pub async fn edge(&self, member: usize, options: EdgeOptions) -> Result<EdgeClient> {
        let member = self
            .members
            .get(member)
            .ok_or_else(|| anyhow!("no cluster member {}", member))?;
        let addr = format!("{}edgebound", member.prefix);
        Ok(EdgeClient::dial(&self.net, &addr, options).await?)
    }

    pub fn api_base(&self) -> Result<String> {
        self.frontlas
            .api_addr()
            .map(|addr| addr.to_string())
            .ok_or_else(|| anyhow!("frontlas api is off"))
    }

    pub async fn shutdown(self) {
        for member in self.members {
            member.informer.close();
            member.frontier.close().await;
        }
        self.frontlas.close().await;
    }
}
