//! Catalog entry types and the per-model lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle state of a model in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    /// Known but not present in the runtime cache
    NotDownloaded,
    /// Download in progress
    Downloading,
    /// Cached (or a local file) and ready to load
    Ready,
    /// Being loaded into the runtime
    Loading,
    /// Loaded in the runtime
    Loaded,
}

impl ModelState {
    /// States that hold the single lifecycle slot.
    /// While any model is in one of these, download and load are no-ops.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Loading | Self::Loaded)
    }

    /// States that are in the middle of an operation
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Downloading | Self::Loading)
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDownloaded => write!(f, "not downloaded"),
            Self::Downloading => write!(f, "downloading"),
            Self::Ready => write!(f, "ready"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
        }
    }
}

/// Persisted catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Remote URL, or the base file name for local models. Unique across the catalog.
    pub url: String,
    /// Size in bytes
    pub size: u64,
    /// Added by the user from a remote URL
    #[serde(default)]
    pub user_added: bool,
    /// Added by the user from local files
    #[serde(default)]
    pub user_added_local: bool,
}

impl Model {
    /// Built-in catalog entry
    pub fn builtin(url: impl Into<String>, size: u64) -> Self {
        Self {
            url: url.into(),
            size,
            user_added: false,
            user_added_local: false,
        }
    }

    /// User-added remote entry
    pub fn custom(url: impl Into<String>, size: u64) -> Self {
        Self {
            user_added: true,
            ..Self::builtin(url, size)
        }
    }

    /// User-added local-file entry, keyed by base file name
    pub fn local(base_name: impl Into<String>, size: u64) -> Self {
        Self {
            user_added_local: true,
            ..Self::builtin(base_name, size)
        }
    }
}

/// Catalog entry with derived display state. Rebuilt on every reload, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageModel {
    #[serde(flatten)]
    pub model: Model,
    /// Display name derived from the url
    pub name: String,
    pub state: ModelState,
    /// Download progress in [0, 1]
    pub download_percent: f32,
}

impl ManageModel {
    pub fn url(&self) -> &str {
        &self.model.url
    }
}

/// Inference parameters, persisted and forwarded to the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceParams {
    /// Worker threads, zero or negative for the runtime default
    pub n_threads: i32,
    pub n_context: u32,
    pub n_batch: u32,
    pub n_predict: u32,
    pub temperature: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            n_threads: -1,
            n_context: 4096,
            n_batch: 128,
            n_predict: 4096,
            temperature: 0.2,
        }
    }
}

/// Snapshot of runtime capabilities, captured when a model finishes loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub is_multithread: bool,
    pub has_chat_template: bool,
}
