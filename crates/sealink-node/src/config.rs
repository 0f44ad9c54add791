//! Node configuration file.
//!
//! ```toml
//! [engine]
//! workers = 10
//! hello_timeout_ms = 3000
//! hello_attempts = 3
//! retry = "exponential"
//! retry_max_ms = 30000
//! accept_hello = true
//! introduce_after_greet = true
//!
//! [trust]
//! subjects = ["CN=bob", "CN=chris"]
//!
//! [switch]
//! routing = "learning"
//! ```
//!
//! Every key is optional.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use sealink_core::{EngineConfig, RetryPolicy, RoutingMethod};
use serde::Deserialize;

/// Whole configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub trust: TrustSection,
    #[serde(default)]
    pub switch: SwitchSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_hello_attempts")]
    pub hello_attempts: u32,
    #[serde(default)]
    pub retry: RetryKind,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_true")]
    pub accept_hello: bool,
    #[serde(default = "default_true")]
    pub introduce_after_greet: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    #[default]
    Fixed,
    Exponential,
}

/// Which peers are trusted when they present.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustSection {
    /// Certificate subjects to trust, e.g. `"CN=bob"`. Empty trusts every
    /// peer.
    #[serde(default)]
    pub subjects: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchSection {
    #[serde(default)]
    pub routing: RoutingKind,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingKind {
    Hub,
    #[default]
    Learning,
}

fn default_workers() -> usize {
    EngineConfig::default().workers
}
fn default_hello_timeout_ms() -> u64 {
    3000
}
fn default_hello_attempts() -> u32 {
    EngineConfig::default().hello_attempts
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            hello_timeout_ms: default_hello_timeout_ms(),
            hello_attempts: default_hello_attempts(),
            retry: RetryKind::default(),
            retry_max_ms: default_retry_max_ms(),
            accept_hello: true,
            introduce_after_greet: true,
        }
    }
}

impl NodeConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        ensure!(config.engine.workers > 0, "engine.workers must be at least 1");
        ensure!(config.engine.hello_attempts > 0, "engine.hello_attempts must be at least 1");
        ensure!(config.engine.hello_timeout_ms > 0, "engine.hello_timeout_ms must be positive");
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        let retry_policy = match engine.retry {
            RetryKind::Fixed => RetryPolicy::Fixed,
            RetryKind::Exponential => {
                RetryPolicy::Exponential { max: Duration::from_millis(engine.retry_max_ms) }
            },
        };
        EngineConfig {
            workers: engine.workers,
            hello_timeout: Duration::from_millis(engine.hello_timeout_ms),
            hello_attempts: engine.hello_attempts,
            retry_policy,
            accept_hello_by_default: engine.accept_hello,
            introduce_after_greet: engine.introduce_after_greet,
            ..EngineConfig::default()
        }
    }

    pub fn routing_method(&self) -> RoutingMethod {
        match self.switch.routing {
            RoutingKind::Hub => RoutingMethod::Hub,
            RoutingKind::Learning => RoutingMethod::LearningSwitch,
        }
    }
}
