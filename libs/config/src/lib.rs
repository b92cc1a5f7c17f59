//! # Frontier Configuration
//!
//! Typed configuration for the two daemons of the workspace: the `frontier`
//! gateway ([`FrontierConfig`]) and the `frontlas` locator
//! ([`FrontlasConfig`]).
//!
//! ## Loading
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable configuration. Sources are layered, later ones winning:
//!
//! 1. built-in defaults (`serde(default)`)
//! 2. the YAML file passed with `--config`
//! 3. environment variables, `FRONTIER_` or `FRONTLAS_` prefixed, with `__`
//!    between sections
//!
//! ```yaml
//! # frontier.yaml
//! edgebound:
//!   listen:
//!     addr: 0.0.0.0:30012
//!   edgeid_alloc_when_no_idservice_on: true
//! exchange:
//!   hash_by: srcip
//! ```
//!
//! ```text
//! FRONTIER_EXCHANGE__HASH_BY=random
//! FRONTLAS_REDIS__MODE=sentinel
//! ```
//!
//! ## TLS
//!
//! Listen sections accept a `tls` block so that existing files parse, but
//! TLS termination is not performed by these daemons. Binaries log a warning
//! when it is enabled.

pub mod frontier;
pub mod frontlas;

pub use frontier::*;
pub use frontlas::*;

use config_crate::{Config, Environment, File, FileFormat, Map};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config_crate::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Listener endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub network: String,
    pub addr: String,
    /// Address peers should use to reach this listener; defaults to `addr`
    pub advertised_addr: Option<String>,
    pub tls: TlsConfig,
}

impl ListenConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            network: "tcp".to_string(),
            addr: addr.into(),
            advertised_addr: None,
            tls: TlsConfig::default(),
        }
    }

    pub fn advertised(&self) -> &str {
        self.advertised_addr.as_deref().unwrap_or(&self.addr)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.addr.is_empty() {
            return Err(ConfigError::Invalid(format!("{}.listen.addr is empty", section)));
        }
        if self.network != "tcp" {
            return Err(ConfigError::Invalid(format!(
                "{}.listen.network {} is not supported",
                section, self.network
            )));
        }
        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self::new("0.0.0.0:0")
    }
}

/// TLS settings; parsed, not acted on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enable: bool,
    pub mtls: bool,
    pub certs: Vec<CertKey>,
    pub ca_certs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertKey {
    pub cert: String,
    pub key: String,
}

/// Dial target list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    pub network: String,
    pub addrs: Vec<String>,
    pub tls: TlsConfig,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            addrs: Vec::new(),
            tls: TlsConfig::default(),
        }
    }
}

/// `RLIMIT_NOFILE` raise at start-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    pub enable: bool,
    pub nofile: u64,
}

impl Default for RlimitConfig {
    fn default() -> Self {
        Self {
            enable: true,
            nofile: 102400,
        }
    }
}

impl RlimitConfig {
    /// Raise `RLIMIT_NOFILE` to `nofile`, capped at the hard limit.
    ///
    /// Failures are logged; a daemon that keeps the default limit still runs.
    #[cfg(unix)]
    pub fn apply(&self) {
        use nix::sys::resource::{getrlimit, setrlimit, Resource};

        if !self.enable {
            return;
        }
        let (soft, hard) = match getrlimit(Resource::RLIMIT_NOFILE) {
            Ok(limits) => limits,
            Err(e) => {
                warn!(error = %e, "getrlimit failed");
                return;
            }
        };
        let wanted = self.nofile.min(hard);
        if wanted <= soft {
            return;
        }
        match setrlimit(Resource::RLIMIT_NOFILE, wanted, hard) {
            Ok(()) => info!(from = soft, to = wanted, "raised nofile limit"),
            Err(e) => warn!(wanted, error = %e, "setrlimit failed"),
        }
    }

    #[cfg(not(unix))]
    pub fn apply(&self) {
        if self.enable {
            warn!("rlimit is not supported on this platform");
        }
    }
}

/// Layer defaults, an optional YAML file, and prefixed environment variables.
///
/// `env` replaces the process environment when given, which keeps tests
/// independent of each other.
pub(crate) fn load_layered<T: DeserializeOwned>(
    path: Option<&Path>,
    prefix: &str,
    env: Option<Map<String, String>>,
) -> Result<T> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        info!("Loading configuration: {:?}", path);
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );
    Ok(builder.build()?.try_deserialize()?)
}
