//! Error types for model lifecycle operations

use crate::models::ModelState;
use thiserror::Error;

/// Errors surfaced by the orchestrator, verifier and store
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("No model files selected")]
    EmptySelection,

    #[error("File '{name}' is not a valid GGUF model")]
    InvalidFormat { name: String },

    #[error("Failed to read '{name}': {source}")]
    FileRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model '{url}' already exists")]
    DuplicateModel { url: String },

    #[error("Model '{url}' is not cached, download it first")]
    ModelNotCached { url: String },

    #[error("Model '{url}' not found")]
    ModelNotFound { url: String },

    #[error("Model '{url}' is {state}")]
    ModelBusy { url: String, state: ModelState },

    #[error("Invalid model URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ManagerError {
    /// Wrap a collaborator failure, keeping its message
    pub fn runtime(err: anyhow::Error) -> Self {
        Self::Runtime(format!("{:#}", err))
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_keeps_io_message() {
        let err = ManagerError::FileRead {
            name: "model.gguf".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("model.gguf"));
        assert!(msg.contains("access denied"));
    }

    #[test]
    fn test_runtime_error_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("download failed");
        let msg = ManagerError::runtime(err).to_string();
        assert!(msg.contains("download failed"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_busy_displays_state() {
        let err = ManagerError::ModelBusy {
            url: "https://example.com/a.gguf".to_string(),
            state: ModelState::Loaded,
        };
        assert_eq!(err.to_string(), "Model 'https://example.com/a.gguf' is loaded");
    }
}
