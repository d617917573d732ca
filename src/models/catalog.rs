//! Built-in model catalog and catalog projection
//!
//! The catalog shown to users is a pure function of four inputs: the
//! built-in list, the persisted custom and local lists, and a snapshot of
//! the runtime cache. Keeping it pure lets it be rebuilt after every
//! mutation and tested without a runtime.

use super::cache::{CacheEntry, fully_cached_urls};
use super::entry::{ManageModel, Model, ModelState};
use super::verify::strip_shard_suffix;
use std::borrow::Cow;
use std::collections::HashSet;

/// Shown when no name can be derived from a url
pub const UNKNOWN_MODEL_NAME: &str = "(unknown model)";

/// Models shipped with the manager
pub fn default_builtin_models() -> Vec<Model> {
    vec![
        Model::builtin(
            "https://huggingface.co/ngxson/SmolLM2-360M-Instruct-Q8_0-GGUF/resolve/main/smollm2-360m-instruct-q8_0.gguf",
            386_404_992, // ~368 MB
        ),
        Model::builtin(
            "https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b-instruct-q8_0.gguf",
            675_710_816, // ~644 MB
        ),
        Model::builtin(
            "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf",
            807_694_464, // ~770 MB
        ),
        // Split into three shards, the url names the first one
        Model::builtin(
            "https://huggingface.co/ngxson/tinyllama_split_test/resolve/main/stories15M-q8_0-00001-of-00003.gguf",
            29_866_208, // ~28 MB total
        ),
    ]
}

/// Derive a display name from a model url or local base name.
///
/// Takes the last path segment, percent-decodes it, then strips any shard
/// suffix and the `.gguf` extension.
pub fn display_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();

    // For absolute urls, only the path after the host carries a name
    let path = match without_query.split_once("://") {
        Some((_, rest)) => match rest.split_once('/') {
            Some((_, path)) => path,
            None => return UNKNOWN_MODEL_NAME.to_string(),
        },
        None => without_query,
    };

    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
    let stem = strip_shard_suffix(&decoded);
    let stem = strip_gguf_extension(stem).trim();

    if stem.is_empty() {
        UNKNOWN_MODEL_NAME.to_string()
    } else {
        stem.to_string()
    }
}

fn strip_gguf_extension(name: &str) -> &str {
    let len = name.len();
    if len >= 5 && name.is_char_boundary(len - 5) && name[len - 5..].eq_ignore_ascii_case(".gguf") {
        &name[..len - 5]
    } else {
        name
    }
}

/// Initial state of a model when the catalog is rebuilt
fn initial_state(model: &Model, cached: &HashSet<&str>) -> ModelState {
    if model.user_added_local || cached.contains(model.url.as_str()) {
        ModelState::Ready
    } else {
        ModelState::NotDownloaded
    }
}

/// Merge model lists into the catalog.
///
/// Order is built-in, custom, local. A url already seen is skipped, so the
/// result never holds two entries with the same url.
pub fn build_catalog(
    builtin: &[Model],
    custom: &[Model],
    local: &[Model],
    cache: &[CacheEntry],
) -> Vec<ManageModel> {
    let cached = fully_cached_urls(cache);
    let mut seen = HashSet::new();

    builtin
        .iter()
        .chain(custom)
        .chain(local)
        .filter(|m| seen.insert(m.url.as_str()))
        .map(|m| ManageModel {
            model: m.clone(),
            name: display_name(&m.url),
            state: initial_state(m, &cached),
            download_percent: 0.0,
        })
        .collect()
}
