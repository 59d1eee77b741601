use crate::errors::WorkspaceError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = "salto.config";
pub const CONFIG_FILE: &str = "workspace.json";
pub const CACHE_DIR: &str = "cache";

pub const DEFAULT_ENV: &str = "default";
pub const DEFAULT_STALENESS_DAYS: i64 = 7;

/// The one environment variable the core reads: the workspace root
pub const WORKSPACE_ROOT_VAR: &str = "SALTO_HOME";

/// Workspace root from the environment, falling back to the current
/// directory
pub fn workspace_root() -> PathBuf {
    std::env::var_os(WORKSPACE_ROOT_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Workspace configuration stored at `salto.config/workspace.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub uid: String,
    pub name: String,
    #[serde(default = "default_envs")]
    pub envs: Vec<String>,
    #[serde(default = "default_current_env")]
    pub current_env: String,
    /// Services configured for this workspace
    #[serde(default)]
    pub services: Vec<String>,
    /// Days before fetched state counts as stale
    #[serde(default = "default_staleness_days")]
    pub staleness_threshold_days: i64,
}

fn default_envs() -> Vec<String> {
    vec![DEFAULT_ENV.to_string()]
}

fn default_current_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_staleness_days() -> i64 {
    DEFAULT_STALENESS_DAYS
}

impl WorkspaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: format!("{:x}", {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(name.as_bytes());
                hasher.finalize()
            }),
            name,
            envs: default_envs(),
            current_env: default_current_env(),
            services: Vec::new(),
            staleness_threshold_days: default_staleness_days(),
        }
    }

    fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load the config from a workspace directory, or fall back to a
    /// fresh default when none exists yet
    pub fn load(root: &Path) -> Result<Self, WorkspaceError> {
        let path = Self::config_path(root);
        if !path.exists() {
            return Ok(Self::new(
                root.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "workspace".to_string()),
            ));
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| WorkspaceError::Config(e.to_string()))
    }

    /// Write-then-rename so a crash never leaves a torn config
    pub fn save(&self, root: &Path) -> Result<(), WorkspaceError> {
        let path = Self::config_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| WorkspaceError::Config(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}
