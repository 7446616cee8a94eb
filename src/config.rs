//! Session-core configuration loaded from `config.yaml`.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Tunables for the session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Max model/tool iterations per generation.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Queue depth past which a warning is logged. The queue itself is
    /// unbounded.
    #[serde(default = "default_queue_warn_depth")]
    pub queue_warn_depth: usize,
    /// Base system instructions prepended to every generation.
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

fn default_max_steps() -> usize {
    35
}

fn default_queue_warn_depth() -> usize {
    32
}

fn default_instructions() -> String {
    "You are a security-testing assistant operating on HTTP requests inside \
     a workbench. Use the available tools to inspect and mutate the current \
     request, track findings, and manage your task list."
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            queue_warn_depth: default_queue_warn_depth(),
            instructions: default_instructions(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read config {}", path.display()))?;
        serde_yaml_ng::from_str(&content).context("parse config.yaml")
    }
}
