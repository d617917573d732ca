//! Single in-flight text generation with cooperative cancellation

use crate::error::{ManagerError, ManagerResult};
use crate::orchestrator::Orchestrator;
use crate::runtime::{CompletionOptions, TokenEvent};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Runs completions against the loaded model, one at a time
pub struct CompletionSession {
    orchestrator: Arc<Orchestrator>,
    generating: AtomicBool,
    /// Token of the running generation
    stop: Mutex<Option<CancellationToken>>,
}

impl CompletionSession {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            generating: AtomicBool::new(false),
            stop: Mutex::new(None),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Ask the running generation to stop.
    ///
    /// The runtime sees the request on its next token, so a few more tokens
    /// may still arrive. No-op when nothing is running.
    pub fn cancel(&self) {
        let stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = stop.as_ref() {
            tracing::debug!("Cancelling generation");
            token.cancel();
        }
    }

    /// Generate text for `prompt`, calling `on_token` with the text so far
    /// after every token.
    ///
    /// Returns `None` without generating when no model is loaded, a download
    /// or load is in flight, or another generation is running.
    pub async fn generate<F>(&self, prompt: &str, on_token: F) -> ManagerResult<Option<String>>
    where
        F: FnMut(&str) + Send,
    {
        self.generate_with_cancel(prompt, CancellationToken::new(), on_token)
            .await
    }

    /// Like [`generate`](Self::generate), stopping when `token` is cancelled
    pub async fn generate_with_cancel<F>(
        &self,
        prompt: &str,
        token: CancellationToken,
        mut on_token: F,
    ) -> ManagerResult<Option<String>>
    where
        F: FnMut(&str) + Send,
    {
        if self.orchestrator.is_transitioning().await {
            tracing::debug!("Lifecycle transition in progress, ignoring generate");
            return Ok(None);
        }
        let Some(model) = self.orchestrator.loaded_model().await else {
            tracing::debug!("No model loaded, ignoring generate");
            return Ok(None);
        };

        if self
            .generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Generation already running");
            return Ok(None);
        }
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        let _guard = GenerationGuard { session: self };

        let options = CompletionOptions::from(&self.orchestrator.inference_params().await);
        let runtime = self.orchestrator.runtime().await;

        tracing::debug!(
            model = %model.name,
            prompt_len = prompt.len(),
            n_predict = options.n_predict,
            "Starting generation"
        );

        let mut tokens = 0usize;
        let mut callback = |event: &TokenEvent| {
            if token.is_cancelled() {
                return ControlFlow::Break(());
            }
            tokens += 1;
            on_token(&event.current_text);
            ControlFlow::Continue(())
        };

        let text = runtime
            .create_completion(prompt, &options, &mut callback)
            .await
            .map_err(ManagerError::runtime)?;

        tracing::debug!(
            model = %model.name,
            tokens = tokens,
            cancelled = token.is_cancelled(),
            "Generation finished"
        );

        Ok(Some(text))
    }
}

/// Clears the generating flag and the stop token when a generation ends
struct GenerationGuard<'a> {
    session: &'a CompletionSession,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        *self
            .session
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.session.generating.store(false, Ordering::SeqCst);
    }
}
