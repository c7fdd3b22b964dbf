use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Client configuration, read from a TOML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub service: ServiceConfig,

    /// Without this section requests go straight to the service URI.
    pub load_balancer: Option<LoadBalancerConfig>,

    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,

    /// Logical base URI of the service, for example: http://items-service
    pub uri: String,

    pub connect_timeout_ms: Option<u64>,

    pub request_timeout_ms: Option<u64>,
}

impl ServiceConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerConfig {
    /// Servers as host:port
    pub servers: Vec<String>,

    #[serde(default)]
    pub max_retries_same_server: u32,

    #[serde(default = "default_max_retries_next_server")]
    pub max_retries_next_server: u32,

    /// Time interval in seconds between health checks, 0 disables them.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

impl LoadBalancerConfig {
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.servers.iter().map(|server| server.parse()).collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries_same_server: self.max_retries_same_server,
            max_retries_next_server: self.max_retries_next_server,
        }
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        match self.health_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// One declared call of the service API.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationConfig {
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Path below the service URI, `{name}` segments are filled from call parameters.
    pub path: String,

    /// Declared return type, `Future<..>` for one value or `Stream<..>` for many.
    pub returns: String,
}

fn default_max_retries_next_server() -> u32 {
    1
}

fn default_health_check_interval_secs() -> u64 {
    10
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        content.parse()
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
