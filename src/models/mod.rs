//! Model data and pure model functions
//!
//! Provides:
//! - Catalog entry types and the lifecycle state enum
//! - Runtime cache snapshot types
//! - GGUF upload verification
//! - The built-in catalog and the catalog projection

pub mod cache;
pub mod catalog;
pub mod entry;
pub mod verify;

pub use cache::{CacheEntry, CacheMetadata, fully_cached_urls};
pub use catalog::{UNKNOWN_MODEL_NAME, build_catalog, default_builtin_models, display_name};
pub use entry::{InferenceParams, ManageModel, Model, ModelState, RuntimeInfo};
pub use verify::{
    DiskFile, GGUF_MAGIC, MemoryFile, ModelFile, VerifiedFiles, strip_shard_suffix, verify_files,
};
