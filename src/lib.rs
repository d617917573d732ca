//! GGUF Manager - Model lifecycle orchestration for on-device inference
//!
//! Tracks a catalog of built-in, user-added remote and user-added local GGUF
//! models, and decides when the external runtime may download, load or
//! unload them. At most one model is loaded at a time.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod store;

pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use models::{
    DiskFile, InferenceParams, ManageModel, MemoryFile, Model, ModelFile, ModelState, RuntimeInfo,
};
pub use orchestrator::{LifecycleEvent, Orchestrator};
pub use runtime::{ModelCache, ModelRuntime, RuntimeFactory};
pub use session::CompletionSession;
pub use store::KvStore;
