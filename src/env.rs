//! Environment collaborator: named variable sets the workbench manages
//! (hosts, tokens, cookies). The core only reads them for prompt assembly;
//! secret values never reach the model in clear text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Literal substituted for secret variable values in prompts.
pub const SECRET_MASK: &str = "{{secret}}";

/// A single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

impl EnvVar {
    /// The value as it may appear in a prompt.
    pub fn display_value(&self) -> &str {
        if self.secret {
            SECRET_MASK
        } else {
            &self.value
        }
    }
}

/// A named variable set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<EnvVar>,
}

/// Snapshot used during prompt assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub all: Vec<Environment>,
    pub selected_id: Option<String>,
}

impl EnvironmentInfo {
    /// The currently selected environment, if any.
    pub fn selected(&self) -> Option<&Environment> {
        let id = self.selected_id.as_deref()?;
        self.all.iter().find(|e| e.id == id)
    }
}

/// Read-only environment access.
#[async_trait]
pub trait EnvironmentService: Send + Sync {
    async fn environment_info(&self) -> anyhow::Result<EnvironmentInfo>;
}

/// Fixed in-memory environment service.
#[derive(Debug, Default)]
pub struct StaticEnvironmentService {
    info: EnvironmentInfo,
}

impl StaticEnvironmentService {
    pub fn new(info: EnvironmentInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl EnvironmentService for StaticEnvironmentService {
    async fn environment_info(&self) -> anyhow::Result<EnvironmentInfo> {
        Ok(self.info.clone())
    }
}
