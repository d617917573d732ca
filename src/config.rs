//! Configuration structures and loading logic

use crate::models::{Model, default_builtin_models};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding the persisted store
    pub store_dir: PathBuf,
    /// Ship the default built-in catalog
    pub include_default_catalog: bool,
    /// Extra built-in models, appended after the defaults
    pub builtin_models: Vec<Model>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            include_default_catalog: true,
            builtin_models: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(store_dir) = std::env::var("GGUF_MANAGER_STORE_DIR") {
            config.store_dir = PathBuf::from(store_dir);
        }
        if let Ok(include) = std::env::var("GGUF_MANAGER_DEFAULT_CATALOG") {
            config.include_default_catalog = include
                .parse()
                .context("Invalid GGUF_MANAGER_DEFAULT_CATALOG value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut urls = HashSet::new();
        for model in self.builtin_catalog() {
            if model.url.trim().is_empty() {
                anyhow::bail!("Built-in model url cannot be empty");
            }
            if !urls.insert(model.url.clone()) {
                anyhow::bail!("Duplicate built-in model url: {}", model.url);
            }
        }

        if !self.store_dir.exists() {
            std::fs::create_dir_all(&self.store_dir).with_context(|| {
                format!("Cannot create store directory: {:?}", self.store_dir)
            })?;
        }

        Ok(())
    }

    /// Effective built-in catalog
    pub fn builtin_catalog(&self) -> Vec<Model> {
        let mut models = if self.include_default_catalog {
            default_builtin_models()
        } else {
            Vec::new()
        };
        models.extend(self.builtin_models.iter().map(|m| Model::builtin(&m.url, m.size)));
        models
    }
}

fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gguf-manager")
}
