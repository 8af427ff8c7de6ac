use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::registry::RegisterOptions;
use crate::stage::Stage;

pub const CONFIG_FILE: &str = "Paddock.toml";

/// Engine configuration, read from `Paddock.toml`.
///
/// ```toml
/// default_stage = "onPreHandler"
/// policy_directory = "policies"
/// watch_stages = ["post-handler"]
/// ignore_duplicates = false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PaddockConfig {
    /// Stage for policies that do not declare one.
    pub default_stage: Stage,

    /// Directory scanned for policy manifests. Relative paths are resolved
    /// against the directory the config file was read from.
    pub policy_directory: PathBuf,

    /// Stages activated up front, for inline policies targeting a stage no
    /// registered policy lives in.
    pub watch_stages: Vec<Stage>,

    pub ignore_duplicates: bool,

    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl Default for PaddockConfig {
    fn default() -> Self {
        Self {
            default_stage: Stage::default(),
            policy_directory: PathBuf::from("policies"),
            watch_stages: Vec::new(),
            ignore_duplicates: false,
            root: None,
        }
    }
}

impl PaddockConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        let content = fs::read_to_string(config_path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.root = config_path.parent().map(Path::to_path_buf);
        debug!(path = %config_path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Find `Paddock.toml` in the current directory or one of its parents.
    pub fn from_project_root() -> Result<Self, ConfigError> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let config_path = current_dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(config_path);
            }

            if !current_dir.pop() {
                break;
            }
        }

        Err(ConfigError::NotFound(CONFIG_FILE.to_string()))
    }

    /// The policy directory, resolved against the config file location.
    pub fn policy_dir(&self) -> PathBuf {
        match &self.root {
            Some(root) if self.policy_directory.is_relative() => root.join(&self.policy_directory),
            _ => self.policy_directory.clone(),
        }
    }

    pub fn register_options(&self) -> RegisterOptions {
        RegisterOptions {
            ignore_duplicates: self.ignore_duplicates,
        }
    }
}
