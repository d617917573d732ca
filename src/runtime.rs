//! Model runtime collaborator interfaces
//!
//! Downloading, caching and executing models is done by an external
//! runtime. The orchestrator only decides when those operations may run.

use crate::models::{CacheEntry, InferenceParams, ModelFile};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Parameter Types
// ============================================================================

/// Bytes received so far for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl DownloadProgress {
    /// Fraction completed in [0, 1], None when the total is unknown
    pub fn fraction(&self) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        Some((self.loaded as f64 / self.total as f64).clamp(0.0, 1.0) as f32)
    }
}

/// Channel the runtime reports download progress on
pub type ProgressSender = mpsc::UnboundedSender<DownloadProgress>;

/// Parameters for loading a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadParams {
    /// Worker threads, None for the runtime default
    pub n_threads: Option<u32>,
    pub n_ctx: u32,
    pub n_batch: u32,
}

impl From<&InferenceParams> for LoadParams {
    fn from(params: &InferenceParams) -> Self {
        Self {
            n_threads: u32::try_from(params.n_threads).ok().filter(|n| *n > 0),
            n_ctx: params.n_context,
            n_batch: params.n_batch,
        }
    }
}

/// Sampling options for a completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub n_predict: u32,
    pub temperature: f32,
}

impl From<&InferenceParams> for CompletionOptions {
    fn from(params: &InferenceParams) -> Self {
        Self {
            n_predict: params.n_predict,
            temperature: params.temperature,
        }
    }
}

/// One generated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub token: u32,
    /// Raw bytes of this token
    pub piece: Vec<u8>,
    /// Text generated so far, including this token
    pub current_text: String,
}

/// Per-token callback. Returning `Break` asks the runtime to stop generating.
pub type TokenCallback<'a> = dyn FnMut(&TokenEvent) -> ControlFlow<()> + Send + 'a;

// ============================================================================
// Trait Definitions
// ============================================================================

/// A runtime instance. At most one model is loaded in an instance at a time.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Download `url` into the cache.
    /// The progress sender must be dropped by the time this returns.
    async fn download_model(&self, url: &str, progress: ProgressSender) -> Result<()>;

    /// Load a cached model
    async fn load_model_from_url(&self, url: &str, params: &LoadParams) -> Result<()>;

    /// Load local files directly, without caching them
    async fn load_model(&self, files: &[Arc<dyn ModelFile>], params: &LoadParams) -> Result<()>;

    /// Check that `url` serves a model container, returning its size
    async fn check_remote_model(&self, url: &str) -> Result<u64>;

    /// Tear down the instance
    async fn exit(&self) -> Result<()>;

    /// Whether the loaded model runs multi-threaded
    fn is_multithread(&self) -> bool;

    /// Chat template of the loaded model, if it ships one
    fn chat_template(&self) -> Option<String>;

    /// Generate text, calling `on_token` once per token. Returns the final text.
    async fn create_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        on_token: &mut TokenCallback<'_>,
    ) -> Result<String>;
}

/// Selects cache entries for bulk deletion
pub type CachePredicate = dyn Fn(&CacheEntry) -> bool + Send + Sync;

/// The runtime's download cache
#[async_trait]
pub trait ModelCache: Send + Sync {
    /// All cache entries
    async fn list(&self) -> Result<Vec<CacheEntry>>;

    /// Bytes cached for `url`, zero when absent
    async fn size_of(&self, url: &str) -> Result<u64>;

    /// Cache key for `url`
    fn key_for_url(&self, url: &str) -> String;

    /// Delete one entry by key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every entry matching `predicate`
    async fn delete_many(&self, predicate: &CachePredicate) -> Result<()>;
}

/// Creates fresh runtime instances
pub trait RuntimeFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ModelRuntime>;
}

impl<F> RuntimeFactory for F
where
    F: Fn() -> Arc<dyn ModelRuntime> + Send + Sync,
{
    fn create(&self) -> Arc<dyn ModelRuntime> {
        self()
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
