//! Configuration management for tumblerctl

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tumbler_orchestrator::OrchestratorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// ksqlDB server
    #[serde(default = "default_ksql_url")]
    pub ksql_url: String,

    /// Kafka REST proxy used for topic administration
    #[serde(default)]
    pub rest_proxy_url: Option<String>,

    /// Cluster id for REST proxy v3 paths
    #[serde(default)]
    pub cluster_id: Option<String>,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default = "default_colored")]
    pub colored: bool,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn default_ksql_url() -> String {
    "http://localhost:8088".to_string()
}

fn default_colored() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ksql_url: default_ksql_url(),
            rest_proxy_url: None,
            cluster_id: None,
            output_format: OutputFormat::Table,
            colored: default_colored(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Load `path`, or `~/.tumbler/config.toml` when none is given.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `~/.tumbler/config.toml`
    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".tumbler").join("config.toml")
    }
}
