//! Model lifecycle orchestration
//!
//! Owns the in-memory catalog and the single runtime instance. Every
//! download or load first claims the lifecycle slot: while any model is
//! downloading, loading or loaded, further downloads and loads are no-ops.
//! The claim is a state check and update under one catalog write lock, so
//! two racing calls can never both proceed.

use crate::error::{ManagerError, ManagerResult};
use crate::metrics;
use crate::models::{
    CacheEntry, InferenceParams, ManageModel, Model, ModelFile, ModelState, RuntimeInfo,
    build_catalog, verify_files,
};
use crate::runtime::{LoadParams, ModelCache, ModelRuntime, RuntimeFactory};
use crate::store::{KvStore, keys};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast, mpsc};

/// Events published as the catalog changes
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A model moved to a new state
    StateChanged { url: String, state: ModelState },
    /// Download progress advanced
    DownloadProgress { url: String, percent: f32 },
    /// A download or load failed
    Failed { url: String, message: String },
    /// A local model was discarded after unloading, or its addition failed
    Removed { url: String },
    /// The catalog was rebuilt
    CatalogReloaded { count: usize },
}

/// Lifecycle orchestrator
pub struct Orchestrator {
    builtin: Vec<Model>,
    store: KvStore,
    cache: Arc<dyn ModelCache>,
    factory: Arc<dyn RuntimeFactory>,
    runtime: RwLock<Arc<dyn ModelRuntime>>,
    catalog: RwLock<Vec<ManageModel>>,
    runtime_info: RwLock<Option<RuntimeInfo>>,
    params: RwLock<InferenceParams>,
    /// Guard to prevent concurrent unloads
    unloading: AtomicBool,
    event_tx: broadcast::Sender<LifecycleEvent>,
}

impl Orchestrator {
    /// Create an orchestrator and build the initial catalog
    pub async fn init(
        builtin: Vec<Model>,
        store: KvStore,
        cache: Arc<dyn ModelCache>,
        factory: Arc<dyn RuntimeFactory>,
    ) -> Self {
        let params = store.load(keys::PARAMS, InferenceParams::default()).await;
        let runtime = factory.create();
        let (event_tx, _) = broadcast::channel(100);

        let orchestrator = Self {
            builtin,
            store,
            cache,
            factory,
            runtime: RwLock::new(runtime),
            catalog: RwLock::new(Vec::new()),
            runtime_info: RwLock::new(None),
            params: RwLock::new(params),
            unloading: AtomicBool::new(false),
            event_tx,
        };

        orchestrator.reload_catalog().await;
        orchestrator
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current catalog
    pub async fn models(&self) -> Vec<ManageModel> {
        self.catalog.read().await.clone()
    }

    /// Catalog entry by url
    pub async fn get(&self, url: &str) -> Option<ManageModel> {
        let catalog = self.catalog.read().await;
        catalog.iter().find(|m| m.url() == url).cloned()
    }

    /// The loaded model, if any
    pub async fn loaded_model(&self) -> Option<ManageModel> {
        let catalog = self.catalog.read().await;
        catalog
            .iter()
            .find(|m| m.state == ModelState::Loaded)
            .cloned()
    }

    /// A download or load is in flight
    pub async fn is_transitioning(&self) -> bool {
        let catalog = self.catalog.read().await;
        catalog.iter().any(|m| m.state.is_transitioning())
    }

    /// Capabilities of the loaded model
    pub async fn runtime_info(&self) -> Option<RuntimeInfo> {
        *self.runtime_info.read().await
    }

    pub async fn inference_params(&self) -> InferenceParams {
        self.params.read().await.clone()
    }

    /// Persist new inference parameters. They apply from the next load or completion.
    pub async fn update_inference_params(&self, params: InferenceParams) -> ManagerResult<()> {
        self.store.save(keys::PARAMS, &params).await?;
        *self.params.write().await = params;
        Ok(())
    }

    pub async fn welcome_seen(&self) -> bool {
        self.store.load(keys::WELCOME, false).await
    }

    pub async fn mark_welcome_seen(&self) -> ManagerResult<()> {
        self.store.save(keys::WELCOME, &true).await
    }

    /// Current runtime instance
    pub(crate) async fn runtime(&self) -> Arc<dyn ModelRuntime> {
        self.runtime.read().await.clone()
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Rebuild the catalog from the built-in list, persisted lists and the cache.
    ///
    /// Entries that are downloading, loading or loaded keep their state and
    /// progress, so a reload never drops the loaded model.
    pub async fn reload_catalog(&self) {
        let custom: Vec<Model> = self.store.load(keys::CUSTOM_MODELS, Vec::new()).await;
        let local: Vec<Model> = self.store.load(keys::LOCAL_MODELS, Vec::new()).await;
        let snapshot = match self.cache.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list runtime cache, treating it as empty");
                Vec::new()
            }
        };

        let mut fresh = build_catalog(&self.builtin, &custom, &local, &snapshot);

        let mut catalog = self.catalog.write().await;
        for entry in fresh.iter_mut() {
            if let Some(prev) = catalog
                .iter()
                .find(|p| p.url() == entry.url() && p.state.is_active())
            {
                entry.state = prev.state;
                entry.download_percent = prev.download_percent;
            }
        }
        // A local model being added is active before its entry is persisted
        let pending: Vec<ManageModel> = catalog
            .iter()
            .filter(|p| p.state.is_active() && !fresh.iter().any(|f| f.url() == p.url()))
            .cloned()
            .collect();
        fresh.extend(pending);
        *catalog = fresh;
        let count = catalog.len();
        drop(catalog);

        tracing::debug!(
            models = count,
            custom = custom.len(),
            local = local.len(),
            cached = snapshot.len(),
            "Catalog reloaded"
        );

        self.emit(LifecycleEvent::CatalogReloaded { count });
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Download a model into the runtime cache.
    ///
    /// No-op while any model is downloading, loading or loaded. On failure
    /// the model reverts to not downloaded and the error is returned.
    pub async fn download_model(&self, url: &str) -> ManagerResult<()> {
        if self.get(url).await.is_some_and(|m| m.model.user_added_local) {
            return Err(ManagerError::InvalidUrl {
                url: url.to_string(),
                reason: "local models cannot be downloaded".to_string(),
            });
        }

        if !self.claim(url, ModelState::Downloading).await? {
            return Ok(());
        }

        let name = crate::models::display_name(url);
        tracing::info!(url = %url, "Starting model download");
        metrics::record_download_started(&name);

        let runtime = self.runtime().await;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let download = runtime.download_model(url, progress_tx);
        let progress = async {
            while let Some(progress) = progress_rx.recv().await {
                if let Some(fraction) = progress.fraction() {
                    self.advance_progress(url, fraction).await;
                }
            }
        };
        let (result, ()) = futures::join!(download, progress);

        match result {
            Ok(()) => {
                self.set_state(url, ModelState::Ready, Some(0.0)).await;
                metrics::record_download_completed(&name);
                tracing::info!(url = %url, "Model download complete");
                Ok(())
            }
            Err(e) => {
                let err = ManagerError::runtime(e);
                tracing::error!(url = %url, error = %err, "Model download failed");
                metrics::record_download_failed(&name);

                self.reset_runtime().await;
                self.set_state(url, ModelState::NotDownloaded, Some(0.0))
                    .await;
                self.emit_failed(url, &err);
                Err(err)
            }
        }
    }

    /// Load a cached model into the runtime.
    ///
    /// User-added remote models are downloaded again first. No-op while any
    /// model is downloading, loading or loaded.
    pub async fn load_model(&self, url: &str) -> ManagerResult<()> {
        let model = {
            let catalog = self.catalog.read().await;
            if let Some(active) = catalog.iter().find(|m| m.state.is_active()) {
                tracing::debug!(
                    url = %url,
                    active = %active.url(),
                    state = %active.state,
                    "Lifecycle busy, ignoring load"
                );
                return Ok(());
            }
            catalog
                .iter()
                .find(|m| m.url() == url)
                .cloned()
                .ok_or_else(|| ManagerError::ModelNotFound {
                    url: url.to_string(),
                })?
        };

        if model.model.user_added {
            self.download_model(url).await?;
        }

        let cached_size = match self.cache.size_of(url).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to read cached size");
                0
            }
        };
        if cached_size == 0 {
            return Err(ManagerError::ModelNotCached {
                url: url.to_string(),
            });
        }

        if !self.claim(url, ModelState::Loading).await? {
            return Ok(());
        }

        tracing::info!(url = %url, cached_size = cached_size, "Loading model");

        let params = LoadParams::from(&*self.params.read().await);
        let runtime = self.runtime().await;
        let result = runtime.load_model_from_url(url, &params).await;

        self.finish_load(url, &runtime, result, LoadSource::Cache)
            .await
    }

    /// Unload the loaded model and replace the runtime instance.
    ///
    /// Local-file models are single use: they are dropped from the persisted
    /// list and the catalog. Other models return to ready.
    pub async fn unload_model(&self) -> ManagerResult<()> {
        if self
            .unloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Unload already in progress");
            return Ok(());
        }
        let _guard = UnloadGuard {
            flag: &self.unloading,
        };

        let Some(loaded) = self.loaded_model().await else {
            return Ok(());
        };
        let url = loaded.url().to_string();

        tracing::info!(url = %url, "Unloading model");

        self.reset_runtime().await;
        *self.runtime_info.write().await = None;
        metrics::record_unload(&loaded.name);
        metrics::set_model_loaded(false);

        if loaded.model.user_added_local {
            self.catalog.write().await.retain(|m| m.url() != url);
            self.emit(LifecycleEvent::Removed { url: url.clone() });
            self.remove_persisted(keys::LOCAL_MODELS, &url).await?;
            tracing::info!(url = %url, "Local model discarded after unload");
        } else {
            self.set_state(&url, ModelState::Ready, Some(0.0)).await;
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Catalog mutations
    // ------------------------------------------------------------------------

    /// Forget a model: drop its persisted entry, delete its cached bytes, reload.
    pub async fn remove_model(&self, url: &str) -> ManagerResult<()> {
        let model = self
            .get(url)
            .await
            .ok_or_else(|| ManagerError::ModelNotFound {
                url: url.to_string(),
            })?;

        if model.state.is_active() {
            return Err(ManagerError::ModelBusy {
                url: url.to_string(),
                state: model.state,
            });
        }

        if model.model.user_added {
            self.remove_persisted(keys::CUSTOM_MODELS, url).await?;
        }
        if model.model.user_added_local {
            self.remove_persisted(keys::LOCAL_MODELS, url).await?;
        }

        let key = self.cache.key_for_url(url);
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(url = %url, key = %key, error = %e, "Failed to delete cached model");
        }

        self.reload_catalog().await;
        tracing::info!(url = %url, "Model removed");

        Ok(())
    }

    /// Clear the whole runtime cache, then reload
    pub async fn remove_all_models(&self) -> ManagerResult<()> {
        let result = self.cache.delete_many(&|_: &CacheEntry| true).await;
        self.reload_catalog().await;

        result.map_err(ManagerError::runtime)?;
        tracing::info!("Runtime cache cleared");

        Ok(())
    }

    /// Add a model from a remote URL
    pub async fn add_custom_model(&self, url: &str) -> ManagerResult<Model> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ManagerError::InvalidUrl {
                url: url.to_string(),
                reason: "URL is empty".to_string(),
            });
        }

        let runtime = self.runtime().await;
        let size = runtime
            .check_remote_model(url)
            .await
            .map_err(|e| ManagerError::InvalidUrl {
                url: url.to_string(),
                reason: format!("{:#}", e),
            })?;

        let mut custom: Vec<Model> = self.store.load(keys::CUSTOM_MODELS, Vec::new()).await;
        if self.get(url).await.is_some() || custom.iter().any(|m| m.url == url) {
            return Err(ManagerError::DuplicateModel {
                url: url.to_string(),
            });
        }

        let model = Model::custom(url, size);
        custom.push(model.clone());
        self.store.save(keys::CUSTOM_MODELS, &custom).await?;

        tracing::info!(url = %url, size = size, "Custom model added");
        self.reload_catalog().await;

        Ok(model)
    }

    /// Verify local files, add them to the catalog and load them directly.
    ///
    /// No-op while any model is downloading, loading or loaded. Verification
    /// and duplicate errors are returned before anything is persisted.
    pub async fn add_local_model(&self, files: Vec<Arc<dyn ModelFile>>) -> ManagerResult<()> {
        if let Some(active) = self.active_model().await {
            tracing::debug!(
                active = %active.url(),
                state = %active.state,
                "Lifecycle busy, ignoring local model"
            );
            return Ok(());
        }

        let verified = verify_files(&files).await?;
        let url = verified.base_name;

        let mut local: Vec<Model> = self.store.load(keys::LOCAL_MODELS, Vec::new()).await;
        if local.iter().any(|m| m.url == url) {
            return Err(ManagerError::DuplicateModel { url });
        }

        // Verification yields, so the slot is claimed again before anything is written
        let model = Model::local(url.clone(), verified.total_size);
        if !self.claim_new(model.clone(), ModelState::Loading).await? {
            return Ok(());
        }

        local.push(model);
        if let Err(e) = self.store.save(keys::LOCAL_MODELS, &local).await {
            self.catalog.write().await.retain(|m| m.url() != url);
            self.emit(LifecycleEvent::Removed { url });
            return Err(e);
        }

        tracing::info!(
            url = %url,
            size = verified.total_size,
            files = files.len(),
            "Local model added"
        );

        let params = LoadParams::from(&*self.params.read().await);
        let runtime = self.runtime().await;
        let result = runtime.load_model(&files, &params).await;

        self.finish_load(&url, &runtime, result, LoadSource::Local)
            .await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn active_model(&self) -> Option<ManageModel> {
        let catalog = self.catalog.read().await;
        catalog.iter().find(|m| m.state.is_active()).cloned()
    }

    /// Claim the lifecycle slot for a model not yet in the catalog, inserting it in `state`.
    /// Returns false, changing nothing, if the slot is already held.
    async fn claim_new(&self, model: Model, state: ModelState) -> ManagerResult<bool> {
        let mut catalog = self.catalog.write().await;

        if let Some(active) = catalog.iter().find(|m| m.state.is_active()) {
            tracing::debug!(
                url = %model.url,
                active = %active.url(),
                active_state = %active.state,
                "Lifecycle busy, ignoring new model"
            );
            return Ok(false);
        }
        if catalog.iter().any(|m| m.url() == model.url) {
            return Err(ManagerError::DuplicateModel { url: model.url });
        }

        let url = model.url.clone();
        catalog.push(ManageModel {
            name: crate::models::display_name(&url),
            model,
            state,
            download_percent: 0.0,
        });
        drop(catalog);

        self.emit(LifecycleEvent::StateChanged { url, state });

        Ok(true)
    }

    /// Claim the lifecycle slot for `url` by moving it to `state`.
    /// Returns false, changing nothing, if the slot is already held.
    async fn claim(&self, url: &str, state: ModelState) -> ManagerResult<bool> {
        let mut catalog = self.catalog.write().await;

        if let Some(active) = catalog.iter().find(|m| m.state.is_active()) {
            tracing::debug!(
                url = %url,
                active = %active.url(),
                active_state = %active.state,
                requested = %state,
                "Lifecycle busy, ignoring request"
            );
            return Ok(false);
        }

        let entry = catalog
            .iter_mut()
            .find(|m| m.url() == url)
            .ok_or_else(|| ManagerError::ModelNotFound {
                url: url.to_string(),
            })?;
        entry.state = state;
        drop(catalog);

        self.emit(LifecycleEvent::StateChanged {
            url: url.to_string(),
            state,
        });

        Ok(true)
    }

    async fn set_state(&self, url: &str, state: ModelState, percent: Option<f32>) {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog.iter_mut().find(|m| m.url() == url) else {
            return;
        };
        entry.state = state;
        if let Some(percent) = percent {
            entry.download_percent = percent;
        }
        drop(catalog);

        self.emit(LifecycleEvent::StateChanged {
            url: url.to_string(),
            state,
        });
    }

    /// Raise the download percentage. Progress never moves backwards.
    async fn advance_progress(&self, url: &str, fraction: f32) {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog
            .iter_mut()
            .find(|m| m.url() == url && m.state == ModelState::Downloading)
        else {
            return;
        };
        if fraction <= entry.download_percent {
            return;
        }
        entry.download_percent = fraction;
        drop(catalog);

        self.emit(LifecycleEvent::DownloadProgress {
            url: url.to_string(),
            percent: fraction,
        });
    }

    async fn finish_load(
        &self,
        url: &str,
        runtime: &Arc<dyn ModelRuntime>,
        result: anyhow::Result<()>,
        source: LoadSource,
    ) -> ManagerResult<()> {
        let name = crate::models::display_name(url);

        match result {
            Ok(()) => {
                let info = RuntimeInfo {
                    is_multithread: runtime.is_multithread(),
                    has_chat_template: runtime.chat_template().is_some(),
                };
                *self.runtime_info.write().await = Some(info);

                let percent = match source {
                    LoadSource::Local => Some(1.0),
                    LoadSource::Cache => None,
                };
                self.set_state(url, ModelState::Loaded, percent).await;

                metrics::record_load_completed(&name, source.as_str());
                metrics::set_model_loaded(true);
                tracing::info!(
                    url = %url,
                    multithread = info.is_multithread,
                    chat_template = info.has_chat_template,
                    "Model loaded"
                );
                Ok(())
            }
            Err(e) => {
                let err = ManagerError::runtime(e);
                tracing::error!(url = %url, error = %err, "Model load failed");
                metrics::record_load_failed(&name);

                self.reset_runtime().await;
                self.set_state(url, ModelState::Ready, Some(0.0)).await;
                self.emit_failed(url, &err);
                Err(err)
            }
        }
    }

    /// Tear down the current runtime and install a fresh one.
    /// The old instance's teardown completes before the new one is visible.
    async fn reset_runtime(&self) {
        let mut runtime = self.runtime.write().await;
        if let Err(e) = runtime.exit().await {
            tracing::warn!(error = %e, "Runtime teardown failed");
        }
        *runtime = self.factory.create();
        tracing::debug!("Runtime instance replaced");
    }

    async fn remove_persisted(&self, key: &str, url: &str) -> ManagerResult<()> {
        let mut models: Vec<Model> = self.store.load(key, Vec::new()).await;
        let before = models.len();
        models.retain(|m| m.url != url);
        if models.len() != before {
            self.store.save(key, &models).await?;
        }
        Ok(())
    }

    fn emit_failed(&self, url: &str, err: &ManagerError) {
        self.emit(LifecycleEvent::Failed {
            url: url.to_string(),
            message: err.to_string(),
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

#[derive(Debug, Clone, Copy)]
enum LoadSource {
    Cache,
    Local,
}

impl LoadSource {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Local => "local",
        }
    }
}

/// RAII guard to ensure the unloading flag is cleared on drop
struct UnloadGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for UnloadGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
