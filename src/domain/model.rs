use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Mechanism used to deploy a new tag for one container. Resolved from
/// labels once per operation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyConfig {
    /// Recreate the container through the Docker API with a new image.
    DockerApi,
    /// Rewrite the image tag inside a compose file, then compose up the
    /// single service.
    Compose {
        file_path: String,
        service_name: String,
    },
    /// Rewrite a variable in a key/value env file, then restart.
    EnvFile { variable: String },
}

impl StrategyConfig {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyConfig::DockerApi => "Docker API",
            StrategyConfig::Compose { .. } => "Compose file",
            StrategyConfig::EnvFile { .. } => "Env file",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::DockerApi => "docker_api",
            StrategyConfig::Compose { .. } => "compose",
            StrategyConfig::EnvFile { .. } => "env_file",
        }
    }
}

/// One container as the runtime reports it: name, image base (without
/// tag), deployed tag, lifecycle status and its full label map.
#[derive(Debug, Clone)]
pub struct RuntimeContainer {
    pub name: String,
    pub image: String,
    pub tag: String,
    pub status: String,
    pub labels: HashMap<String, String>,
}

/// Dashboard-facing view of a monitored container, rebuilt fresh from
/// the runtime on every discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredContainer {
    pub container: String,
    pub image: String,
    pub current_tag: String,
    pub available_tag: Option<String>,
    pub has_update: bool,
    pub status: String,
    pub strategy: &'static str,
    pub strategy_label: &'static str,
    pub changelog: Option<String>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Deployed,
    Previous,
    RolledBack,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Deployed => "deployed",
            HistoryStatus::Previous => "previous",
            HistoryStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<HistoryStatus> {
        match s {
            "deployed" => Some(HistoryStatus::Deployed),
            "previous" => Some(HistoryStatus::Previous),
            "rolled_back" => Some(HistoryStatus::RolledBack),
            _ => None,
        }
    }
}

/// One row of per-container version history, newest first when listed.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub tag: String,
    pub date: String,
    pub status: HistoryStatus,
}

/// Result of one update/rollback/check operation.
#[derive(Debug, Clone, Serialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok(message: impl Into<String>) -> OpResult {
        OpResult {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> OpResult {
        OpResult {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Effective runtime settings, resolved once per operation from the
/// settings store with the static configuration as fallback.
#[derive(Debug, Clone)]
pub struct Settings {
    pub allow_prerelease: bool,
    pub auto_update: bool,
    pub health_check_timeout: u64,
    pub history_limit: u32,
    pub check_interval: u64,
}
