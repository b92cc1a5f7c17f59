//! End-to-end test scenarios

pub mod cluster_routing;
pub mod edge_round_trip;
pub mod id_fallback;
pub mod liveness_decay;
pub mod reconnect;
pub mod reverse_publish;
pub mod topic_fanout;

pub use cluster_routing::ClusterRoutingTest;
pub use edge_round_trip::EdgeRoundTripTest;
pub use id_fallback::IdFallbackTest;
pub use liveness_decay::LivenessDecayTest;
pub use reconnect::ReconnectDisplacesTest;
pub use reverse_publish::ReversePublishTest;
pub use topic_fanout::TopicFanoutTest;
