//! Lifecycle integration tests
//!
//! Drives the orchestrator through its public API with an in-process runtime
//! and a store on disk.

use anyhow::Result;
use async_trait::async_trait;
use gguf_manager::models::{CacheEntry, CacheMetadata, GGUF_MAGIC};
use gguf_manager::runtime::{
    CachePredicate, CompletionOptions, DownloadProgress, LoadParams, ProgressSender, TokenCallback,
    TokenEvent,
};
use gguf_manager::{
    CompletionSession, DiskFile, KvStore, LifecycleEvent, ManagerError, Model, ModelCache,
    ModelFile, ModelRuntime, ModelState, Orchestrator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const SMALL: &str = "https://example.com/models/small.gguf";
const LARGE: &str = "https://example.com/models/large-00001-of-00002.gguf";

/// Cache that records completed downloads by url
#[derive(Default)]
struct TestCache {
    entries: Mutex<Vec<CacheEntry>>,
}

impl TestCache {
    fn put(&self, url: &str, size: u64) {
        self.entries.lock().unwrap().push(CacheEntry {
            name: self.key_for_url(url),
            size,
            metadata: CacheMetadata {
                original_size: size,
                original_url: url.to_string(),
            },
        });
    }
}

#[async_trait]
impl ModelCache for TestCache {
    async fn list(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn size_of(&self, url: &str) -> Result<u64> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.metadata.original_url == url)
            .map(|e| e.size)
            .sum())
    }

    fn key_for_url(&self, url: &str) -> String {
        url.replace(['/', ':'], "_")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| e.name != key);
        Ok(())
    }

    async fn delete_many(&self, predicate: &CachePredicate) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| !predicate(e));
        Ok(())
    }
}

struct TestRuntime {
    cache: Arc<TestCache>,
    exits: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelRuntime for TestRuntime {
    async fn download_model(&self, url: &str, progress: ProgressSender) -> Result<()> {
        for loaded in (0..=1000).step_by(250) {
            let _ = progress.send(DownloadProgress {
                loaded,
                total: 1000,
            });
        }
        self.cache.put(url, 1000);
        Ok(())
    }

    async fn load_model_from_url(&self, _url: &str, params: &LoadParams) -> Result<()> {
        anyhow::ensure!(params.n_ctx > 0, "context size must be positive");
        Ok(())
    }

    async fn load_model(&self, files: &[Arc<dyn ModelFile>], _params: &LoadParams) -> Result<()> {
        anyhow::ensure!(!files.is_empty(), "no files");
        Ok(())
    }

    async fn check_remote_model(&self, url: &str) -> Result<u64> {
        if url.ends_with(".gguf") {
            Ok(1000)
        } else {
            anyhow::bail!("not a GGUF container")
        }
    }

    async fn exit(&self) -> Result<()> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_multithread(&self) -> bool {
        false
    }

    fn chat_template(&self) -> Option<String> {
        None
    }

    async fn create_completion(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
        on_token: &mut TokenCallback<'_>,
    ) -> Result<String> {
        let mut text = String::new();
        for (i, word) in prompt.split_whitespace().rev().enumerate() {
            text.push_str(word);
            text.push(' ');
            let event = TokenEvent {
                token: i as u32,
                piece: word.as_bytes().to_vec(),
                current_text: text.clone(),
            };
            if on_token(&event).is_break() {
                break;
            }
        }
        Ok(text)
    }
}

struct Setup {
    orchestrator: Arc<Orchestrator>,
    exits: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    store_dir: TempDir,
    cache: Arc<TestCache>,
}

async fn setup() -> Setup {
    let store_dir = TempDir::new().unwrap();
    let cache = Arc::new(TestCache::default());
    let exits = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));

    let factory = {
        let cache = cache.clone();
        let exits = exits.clone();
        let created = created.clone();
        move || -> Arc<dyn ModelRuntime> {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::new(TestRuntime {
                cache: cache.clone(),
                exits: exits.clone(),
            })
        }
    };

    let orchestrator = Orchestrator::init(
        vec![Model::builtin(SMALL, 1000), Model::builtin(LARGE, 2000)],
        KvStore::new(store_dir.path()),
        cache.clone(),
        Arc::new(factory),
    )
    .await;

    Setup {
        orchestrator: Arc::new(orchestrator),
        exits,
        created,
        store_dir,
        cache,
    }
}

#[tokio::test]
async fn test_download_load_generate_unload() {
    let s = setup().await;
    let mut events = s.orchestrator.subscribe_events();

    s.orchestrator.download_model(SMALL).await.unwrap();
    s.orchestrator.load_model(SMALL).await.unwrap();
    assert_eq!(
        s.orchestrator.loaded_model().await.unwrap().name,
        "small"
    );

    let session = CompletionSession::new(s.orchestrator.clone());
    let mut last = String::new();
    let text = session
        .generate("world hello", |t| last = t.to_string())
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("hello world "));
    assert_eq!(last, "hello world ");

    s.orchestrator.unload_model().await.unwrap();
    assert_eq!(
        s.orchestrator.get(SMALL).await.unwrap().state,
        ModelState::Ready
    );
    assert_eq!(s.exits.load(Ordering::SeqCst), 1);
    assert_eq!(s.created.load(Ordering::SeqCst), 2);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::StateChanged { url, state } = event {
            assert_eq!(url, SMALL);
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            ModelState::Downloading,
            ModelState::Ready,
            ModelState::Loading,
            ModelState::Loaded,
            ModelState::Ready,
        ]
    );
}

#[tokio::test]
async fn test_generate_requires_loaded_model() {
    let s = setup().await;
    let session = CompletionSession::new(s.orchestrator.clone());
    assert!(session.generate("hi", |_| {}).await.unwrap().is_none());
}

#[tokio::test]
async fn test_custom_models_survive_restart() {
    let s = setup().await;
    let url = "https://example.com/other/custom.gguf";

    s.orchestrator.add_custom_model(url).await.unwrap();
    let err = s.orchestrator.add_custom_model(url).await.unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateModel { .. }));

    let err = s
        .orchestrator
        .add_custom_model("https://example.com/readme.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidUrl { .. }));

    // A second process over the same store sees the custom model
    let again = Orchestrator::init(
        Vec::new(),
        KvStore::new(s.store_dir.path()),
        s.cache.clone(),
        Arc::new(|| -> Arc<dyn ModelRuntime> {
            Arc::new(TestRuntime {
                cache: Arc::new(TestCache::default()),
                exits: Arc::new(AtomicUsize::new(0)),
            })
        }),
    )
    .await;
    let models = again.models().await;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "custom");
    assert!(models[0].model.user_added);
}

#[tokio::test]
async fn test_local_files_from_disk() {
    let s = setup().await;
    let dir = TempDir::new().unwrap();

    let first = dir.path().join("tiny-00001-of-00002.gguf");
    let second = dir.path().join("tiny-00002-of-00002.gguf");
    let mut head = GGUF_MAGIC.to_vec();
    head.extend_from_slice(&[3, 0, 0, 0]);
    std::fs::write(&first, &head).unwrap();
    std::fs::write(&second, [0u8; 24]).unwrap();

    let files: Vec<Arc<dyn ModelFile>> = vec![
        Arc::new(DiskFile::open(&first).await.unwrap()),
        Arc::new(DiskFile::open(&second).await.unwrap()),
    ];
    s.orchestrator.add_local_model(files).await.unwrap();

    let loaded = s.orchestrator.loaded_model().await.unwrap();
    assert_eq!(loaded.url(), "tiny");
    assert_eq!(loaded.model.size, 32);
    assert_eq!(loaded.download_percent, 1.0);

    s.orchestrator.unload_model().await.unwrap();
    assert!(s.orchestrator.get("tiny").await.is_none());
    assert!(s.store_dir.path().join("local_models.json").exists());
}

#[tokio::test]
async fn test_remove_all_models() {
    let s = setup().await;
    s.orchestrator.download_model(SMALL).await.unwrap();
    s.orchestrator.download_model(LARGE).await.unwrap();

    s.orchestrator.remove_all_models().await.unwrap();

    assert!(
        s.orchestrator
            .models()
            .await
            .iter()
            .all(|m| m.state == ModelState::NotDownloaded)
    );
}
