//! Model mode and the shared cell holding it

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which backend serves inference requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    #[default]
    Local,
    Cloud,
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::Local => "local",
            ModelMode::Cloud => "cloud",
        }
    }

    /// The other mode of the two-state toggle
    pub fn toggled(&self) -> Self {
        match self {
            ModelMode::Local => ModelMode::Cloud,
            ModelMode::Cloud => ModelMode::Local,
        }
    }
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "ollama" | "offline" => Ok(ModelMode::Local),
            "cloud" | "remote" | "online" => Ok(ModelMode::Cloud),
            other => Err(format!("Unknown mode: {}. Available: local, cloud", other)),
        }
    }
}

/// Owned handle to the process-wide mode.
///
/// Clones share the same cell. Every read and write goes through one lock,
/// so a reader sees either the old or the new mode, never anything else.
#[derive(Debug, Clone, Default)]
pub struct ModeCell {
    inner: Arc<RwLock<ModelMode>>,
}

impl ModeCell {
    /// A fresh cell, always starting in Local
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> ModelMode {
        *self.inner.read().await
    }

    /// Store a new mode and return the one it replaced
    pub(crate) async fn set(&self, mode: ModelMode) -> ModelMode {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, mode)
    }
}
