//! Gateway configuration.

use crate::{load_layered, ConfigError, DialConfig, ListenConfig, Result, RlimitConfig};
use config_crate::Map;
use serde::{Deserialize, Serialize};
use std::path::Path;
use types::HashPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    pub daemon: DaemonConfig,
    pub edgebound: EdgeboundConfig,
    pub servicebound: ServiceboundConfig,
    pub controlplane: ControlPlaneConfig,
    pub exchange: ExchangeConfig,
    pub mqm: MqmConfig,
    pub frontlas: FrontlasDialConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub rlimit: RlimitConfig,
    /// Instance id reported to Frontlas; a random one is generated when empty
    pub frontier_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeboundConfig {
    pub listen: ListenConfig,
    pub bypass: BypassConfig,
    pub bypass_enable: bool,
    /// Allocate ids locally when no service serves `get_edge_id`
    pub edgeid_alloc_when_no_idservice_on: bool,
}

impl Default for EdgeboundConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::new("0.0.0.0:30012"),
            bypass: BypassConfig::default(),
            bypass_enable: false,
            edgeid_alloc_when_no_idservice_on: true,
        }
    }
}

/// Where non-gateway traffic on the edge port is proxied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassConfig {
    pub network: String,
    pub addr: String,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            addr: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceboundConfig {
    pub listen: ListenConfig,
}

impl Default for ServiceboundConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::new("0.0.0.0:30011"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub enable: bool,
    pub listen: ListenConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            enable: false,
            listen: ListenConfig::new("0.0.0.0:30010"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub hash_by: HashPolicy,
}

/// MQ manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqmConfig {
    /// Seconds a produce into a sink may take
    pub produce_timeout: u64,
}

impl Default for MqmConfig {
    fn default() -> Self {
        Self { produce_timeout: 30 }
    }
}

/// How this gateway reaches Frontlas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontlasDialConfig {
    pub enable: bool,
    pub dial: DialConfig,
    /// Seconds between transport heartbeats to Frontlas
    pub heartbeat_interval: u64,
}

impl Default for FrontlasDialConfig {
    fn default() -> Self {
        Self {
            enable: false,
            dial: DialConfig {
                addrs: vec!["127.0.0.1:40012".to_string()],
                ..DialConfig::default()
            },
            heartbeat_interval: 20,
        }
    }
}

impl FrontierConfig {
    /// Load from an optional YAML file with `FRONTIER_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map in place of the process environment
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let config: Self = load_layered(path, "FRONTIER", env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.edgebound.listen.validate("edgebound")?;
        self.servicebound.listen.validate("servicebound")?;
        if self.controlplane.enable {
            self.controlplane.listen.validate("controlplane")?;
        }
        if self.edgebound.bypass_enable && self.edgebound.bypass.addr.is_empty() {
            return Err(ConfigError::Invalid(
                "edgebound.bypass.addr is required when bypass_enable is set".to_string(),
            ));
        }
        if self.frontlas.enable && self.frontlas.dial.addrs.is_empty() {
            return Err(ConfigError::Invalid("frontlas.dial.addrs is empty".to_string()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
