use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result};

pub const CONFIG_FILE: &str = "converge.toml";

fn default_max_passes() -> usize {
    3
}

fn default_max_children() -> usize {
    1
}

fn default_expansion_size() -> usize {
    8192
}

fn default_scope_bindings() -> usize {
    8192
}

fn default_self_reference_depth() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub limits: EngineLimits,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub bundlesequence: Option<Vec<String>>,
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default)]
    pub define: Vec<String>,
    #[serde(default)]
    pub negate: Vec<String>,
    #[serde(default)]
    pub ignore_missing_bundles: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            bundlesequence: None,
            max_passes: default_max_passes(),
            max_children: default_max_children(),
            define: Vec::new(),
            negate: Vec::new(),
            ignore_missing_bundles: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct EngineLimits {
    #[serde(default = "default_expansion_size")]
    pub max_expansion_size: usize,
    #[serde(default = "default_scope_bindings")]
    pub max_scope_bindings: usize,
    #[serde(default = "default_self_reference_depth")]
    pub self_reference_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_expansion_size: default_expansion_size(),
            max_scope_bindings: default_scope_bindings(),
            self_reference_depth: default_self_reference_depth(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: AgentConfig = toml::from_str(source).map_err(|e| ConvergeError::ConfigError {
            message: format!("Failed to parse {}: {}", CONFIG_FILE, e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConvergeError::IoError {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Walks up from `start_dir` looking for `converge.toml`.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_passes == 0 {
            return Err(ConvergeError::ConfigError {
                message: "agent.max_passes must be at least 1".into(),
            });
        }
        if self.limits.max_expansion_size == 0 || self.limits.max_scope_bindings == 0 {
            return Err(ConvergeError::ConfigError {
                message: "limits must be positive".into(),
            });
        }
        Ok(())
    }
}
