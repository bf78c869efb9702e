use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Result, Context as AnyhowContext};
use serde::{Serialize, Deserialize};
use crate::fanout::JoinOptions;
use crate::runtime::offload::DEFAULT_THREAD_NAME;

/// 运行时配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    pub offload: OffloadConfig,
    pub join: JoinConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// When false, CPU-bound work runs inline on the calling task.
    pub enabled: bool,
    pub thread_name: String,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub timeout_ms: Option<u64>,
    pub raise_on_error: bool,
    pub cancel_abandoned: bool,
}

impl ScatterConfig {
    pub fn join_options(&self) -> JoinOptions {
        JoinOptions {
            raise_on_error: self.join.raise_on_error,
            timeout: self.join.timeout_ms.map(Duration::from_millis),
            cancel_abandoned: self.join.cancel_abandoned,
        }
    }
}

pub fn load_config_from_yaml(file_path: impl AsRef<Path>) -> Result<ScatterConfig> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read config file from {}", file_path.display()))?;

    let config: ScatterConfig = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", file_path.display()))?;

    Ok(config)
}
