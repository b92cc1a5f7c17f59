//! Every scenario under the default framework configuration.

use frontier_e2e_tests::framework::{TestConfig, TestFramework, TestResult, TestScenario};
use frontier_e2e_tests::scenarios::*;

async fn assert_passes<S: TestScenario>(scenario: S) {
    let framework = TestFramework::new(TestConfig::default());
    let result: TestResult = framework.run_scenario(&scenario).await;
    assert!(result.success, "{} failed: {:#?}", scenario.name(), result);
}

#[tokio::test]
async fn test_edge_round_trip() {
    assert_passes(EdgeRoundTripTest::default()).await;
}

#[tokio::test]
async fn test_reverse_publish() {
    assert_passes(ReversePublishTest::default()).await;
}

#[tokio::test]
async fn test_topic_fanout() {
    assert_passes(TopicFanoutTest::default()).await;
}

#[tokio::test]
async fn test_reconnect_displaces_previous_edge() {
    assert_passes(ReconnectDisplacesTest::default()).await;
}

#[tokio::test]
async fn test_id_fallback() {
    assert_passes(IdFallbackTest).await;
}

#[tokio::test]
async fn test_liveness_decay() {
    assert_passes(LivenessDecayTest::default()).await;
}

#[tokio::test]
async fn test_cluster_routing() {
    assert_passes(ClusterRoutingTest::default()).await;
}
