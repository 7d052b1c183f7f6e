//! Inference session
//!
//! Single authority over the resident model and the active generation
//! stream. Exactly one model may be resident at a time; every lifecycle
//! transition goes through the state machine guarded here:
//!
//! `Unloaded -load-> Loading -> Ready -generate-> Generating -> Ready`,
//! `Ready -unload-> Unloading -> Unloaded`, any failure -> `Failed`,
//! recoverable only via a fresh `load`.

use crate::inference::evaluator::{LoadedModel, ModelEvaluator};
use crate::inference::streaming::{CancelFlag, FinishReason, StreamToken, TokenStream};
use crate::inference::GenerationBackend;
use crate::storage::assets::{AssetError, ModelAssetResolver};
use crate::types::{GenerationRequest, ModelConfig, ModelSpec};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Lifecycle state of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Generating,
    Unloading,
    Failed(String),
}

/// Session and backend errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is forbidden in the current state; state is unchanged
    #[error("{operation} not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The evaluator rejected the model or configuration
    #[error("Model load failed: {0}")]
    LoadFailed(String),

    /// The evaluator faulted while producing tokens
    #[error("Generation fault: {0}")]
    GenerationFault(String),

    /// The model artifact could not be resolved
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// The backend cannot serve requests right now (remote offline, no key)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

struct SessionInner<M> {
    state: Mutex<SessionState>,
    model: Mutex<Option<M>>,
    cancel: CancelFlag,
}

/// Owns the loaded-model lifecycle and streaming generation
pub struct InferenceSession<E: ModelEvaluator> {
    evaluator: Arc<E>,
    resolver: Arc<ModelAssetResolver>,
    spec: ModelSpec,
    inner: Arc<SessionInner<E::Model>>,
}

impl<E: ModelEvaluator> InferenceSession<E> {
    /// Create a session for one model artifact; nothing is loaded yet
    pub fn new(evaluator: E, resolver: Arc<ModelAssetResolver>, spec: ModelSpec) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            resolver,
            spec,
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::Unloaded),
                model: Mutex::new(None),
                cancel: CancelFlag::new(),
            }),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.inner.state.lock().await.clone()
    }

    /// Load the model with the given configuration
    ///
    /// No-op when already `Ready`. Rejected while `Loading`, `Generating`
    /// or `Unloading`. From `Unloaded` or `Failed` this resolves the
    /// artifact (downloading it when absent, which may take minutes) and
    /// hands it to the evaluator off the async executor.
    pub async fn load(&self, config: ModelConfig) -> Result<(), SessionError> {
        self.load_with_progress(config, |fraction| {
            tracing::debug!("Model fetch progress: {:.0}%", fraction * 100.0);
        })
        .await
    }

    /// `load` with download progress reporting
    pub async fn load_with_progress(
        &self,
        config: ModelConfig,
        progress: impl Fn(f32) + Send,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            match &*state {
                SessionState::Ready => {
                    tracing::debug!("Model already loaded, load is a no-op");
                    return Ok(());
                }
                SessionState::Loading | SessionState::Generating | SessionState::Unloading => {
                    return Err(SessionError::InvalidState {
                        operation: "load",
                        state: state.clone(),
                    });
                }
                SessionState::Unloaded | SessionState::Failed(_) => {
                    *state = SessionState::Loading;
                }
            }
        }

        match self.resolve_and_load(config, progress).await {
            Ok(model) => {
                *self.inner.model.lock().await = Some(model);
                *self.inner.state.lock().await = SessionState::Ready;
                tracing::info!("Model ready: {} ({})", self.spec.name, config.quantization.tag());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Load failed: {e}");
                *self.inner.state.lock().await = SessionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn resolve_and_load(
        &self,
        config: ModelConfig,
        progress: impl Fn(f32) + Send,
    ) -> Result<E::Model, SessionError> {
        let path = self.resolver.ensure_available(&self.spec, progress).await?;

        let evaluator = self.evaluator.clone();
        tokio::task::spawn_blocking(move || evaluator.load(&path, &config))
            .await
            .map_err(|e| SessionError::LoadFailed(format!("load task failed: {e}")))?
            .map_err(|e| SessionError::LoadFailed(e.to_string()))
    }

    /// Start a generation, returning the token stream
    ///
    /// Only legal while `Ready`; transitions to `Generating` for the
    /// lifetime of the stream. The worker runs off the async executor and
    /// observes cancellation at every token boundary.
    pub async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            if *state != SessionState::Ready {
                return Err(SessionError::InvalidState {
                    operation: "generate",
                    state: state.clone(),
                });
            }
            *state = SessionState::Generating;
        }
        self.inner.cancel.reset();

        let (tx, stream) = TokenStream::channel();
        let inner = self.inner.clone();
        let _worker = tokio::task::spawn_blocking(move || run_generation(inner, request, tx));
        Ok(stream)
    }

    /// Request cooperative cancellation of the in-flight generation
    ///
    /// Observed at the next token boundary; never truncates mid-token.
    pub fn cancel(&self) {
        tracing::debug!("Cancellation requested");
        self.inner.cancel.request();
    }

    /// Release the resident model's memory
    ///
    /// Rejected while `Generating` (cancel first). A no-op when already
    /// `Unloaded`; from `Failed` this clears the session back to
    /// `Unloaded`.
    pub async fn unload(&self) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            match &*state {
                SessionState::Unloaded => return Ok(()),
                SessionState::Ready | SessionState::Failed(_) => {
                    *state = SessionState::Unloading;
                }
                SessionState::Loading | SessionState::Generating | SessionState::Unloading => {
                    return Err(SessionError::InvalidState {
                        operation: "unload",
                        state: state.clone(),
                    });
                }
            }
        }

        let model = self.inner.model.lock().await.take();
        if let Some(model) = model {
            // Releasing multi-gigabyte weights can take a moment
            let _ = tokio::task::spawn_blocking(move || drop(model)).await;
        }
        *self.inner.state.lock().await = SessionState::Unloaded;
        tracing::info!("Model unloaded");
        Ok(())
    }
}

#[async_trait]
impl<E: ModelEvaluator> GenerationBackend for InferenceSession<E> {
    async fn ensure_ready(&self, config: &ModelConfig) -> Result<(), SessionError> {
        self.load(*config).await
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, SessionError> {
        InferenceSession::generate(self, request).await
    }

    fn cancel(&self) {
        InferenceSession::cancel(self);
    }
}

/// Blocking generation worker: pulls evaluator tokens one at a time and
/// pushes them over the bounded stream channel.
fn run_generation<M: LoadedModel>(
    inner: Arc<SessionInner<M>>,
    request: GenerationRequest,
    tx: mpsc::Sender<StreamToken>,
) {
    let taken = inner.model.blocking_lock().take();
    let Some(mut model) = taken else {
        fail(&inner, &tx, "no resident model".to_string());
        return;
    };

    if let Err(e) = model.begin(&request) {
        fail(&inner, &tx, e.to_string());
        return;
    }

    let mut accumulated = String::new();
    let mut emitted: u32 = 0;
    let finish = loop {
        if inner.cancel.requested() {
            break FinishReason::Cancelled;
        }
        if emitted >= request.max_tokens {
            break FinishReason::MaxTokens;
        }

        match model.next_token() {
            Ok(None) => break FinishReason::EndOfStream,
            Ok(Some(token)) => {
                accumulated.push_str(&token);
                if suffix_matches_stop(&accumulated, &request.stop) {
                    // The completing token is withheld so stop markers
                    // never reach callers
                    break FinishReason::Stop;
                }
                if tx.blocking_send(StreamToken::Token(token)).is_err() {
                    // Consumer dropped the stream; treat as cancellation
                    break FinishReason::Cancelled;
                }
                emitted += 1;
            }
            Err(e) => {
                drop(model);
                fail(&inner, &tx, e.to_string());
                return;
            }
        }
    };

    *inner.model.blocking_lock() = Some(model);
    *inner.state.blocking_lock() = SessionState::Ready;
    tracing::debug!("Generation finished: {finish:?} after {emitted} tokens");
    let _ = tx.blocking_send(StreamToken::Done(finish));
}

/// Mark the session failed and end the stream with an error, so callers
/// can distinguish a crash from a finished generation
fn fail<M>(inner: &SessionInner<M>, tx: &mpsc::Sender<StreamToken>, message: String) {
    tracing::error!("Evaluator fault: {message}");
    *inner.state.blocking_lock() = SessionState::Failed(message.clone());
    let _ = tx.blocking_send(StreamToken::Error(message));
}

fn suffix_matches_stop(accumulated: &str, stop: &[String]) -> bool {
    stop.iter()
        .any(|s| !s.is_empty() && accumulated.ends_with(s.as_str()))
}
