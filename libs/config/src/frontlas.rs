//! Locator configuration.

use crate::{load_layered, ConfigError, ListenConfig, Result, RlimitConfig};
use config_crate::Map;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontlasConfig {
    pub daemon: FrontlasDaemonConfig,
    pub control_plane: FrontlasPlaneConfig,
    pub frontier_plane: FrontlasPlaneConfig,
    pub redis: RedisConfig,
    pub frontier_manager: FrontierManagerConfig,
}

impl Default for FrontlasConfig {
    fn default() -> Self {
        Self {
            daemon: FrontlasDaemonConfig::default(),
            control_plane: FrontlasPlaneConfig {
                listen: ListenConfig::new("0.0.0.0:40011"),
            },
            frontier_plane: FrontlasPlaneConfig {
                listen: ListenConfig::new("0.0.0.0:40012"),
            },
            redis: RedisConfig::default(),
            frontier_manager: FrontierManagerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontlasDaemonConfig {
    pub rlimit: RlimitConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontlasPlaneConfig {
    pub listen: ListenConfig,
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `standalone`, `sentinel`, or `cluster`
    pub mode: String,
    pub addrs: Vec<String>,
    pub db: i64,
    pub user: String,
    pub password: String,
    /// Sentinel master name
    pub master_name: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: "standalone".to_string(),
            addrs: vec!["127.0.0.1:6379".to_string()],
            db: 0,
            user: String::new(),
            password: String::new(),
            master_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierManagerConfig {
    pub expiration: Expiration,
}

/// Key TTLs in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expiration {
    /// `frontlas:alive:*` keys
    pub alive: u64,
    pub edge_meta: u64,
    pub service_meta: u64,
    pub frontier_meta: u64,
}

impl Default for Expiration {
    fn default() -> Self {
        Self {
            alive: 25,
            edge_meta: 30,
            service_meta: 30,
            frontier_meta: 30,
        }
    }
}

impl FrontlasConfig {
    /// Load from an optional YAML file with `FRONTLAS_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let config: Self = load_layered(path, "FRONTLAS", env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.control_plane.listen.validate("control_plane")?;
        self.frontier_plane.listen.validate("frontier_plane")?;
        if self.redis.addrs.is_empty() {
            return Err(ConfigError::Invalid("redis.addrs is empty".to_string()));
        }
        if self.redis.mode == "sentinel" && self.redis.master_name.is_empty() {
            return Err(ConfigError::Invalid(
                "redis.master_name is required in sentinel mode".to_string(),
            ));
        }
        if self.frontier_manager.expiration.alive == 0 {
            return Err(ConfigError::Invalid("expiration.alive must be positive".to_string()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
