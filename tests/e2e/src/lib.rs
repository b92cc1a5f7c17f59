//! End-to-End Test Framework for Frontier
//!
//! Scenarios start real gateways (and, for cluster scenarios, a Frontlas
//! locator) on in-memory networks and drive them with the edge, service,
//! and cluster SDK clients.

pub mod framework;
pub mod scenarios;

pub use framework::{check, TestConfig, TestFramework, TestMetrics, TestResult, TestScenario, ValidationResult};
pub use scenarios::*;
