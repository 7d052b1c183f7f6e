//! LLM inference engine
//!
//! This module owns the model lifecycle and streaming generation: the
//! evaluator seam, the session state machine, the pull-based token stream
//! and the optional remote fallback backend.

pub mod evaluator;
pub mod remote;
pub mod session;
pub mod streaming;

pub use evaluator::{EvaluatorError, LoadedModel, ModelEvaluator};
pub use remote::RemoteProvider;
pub use session::{InferenceSession, SessionError, SessionState};
pub use streaming::{CancelFlag, FinishReason, StreamToken, TokenStream};

use crate::types::{GenerationRequest, ModelConfig};
use async_trait::async_trait;

/// A backend able to execute one generation turn
///
/// The local [`InferenceSession`] and the remote fallback provider both
/// implement this, so the orchestrator is agnostic to which backend runs
/// a turn; selection happens by configuration, not by branching inside
/// the turn logic.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Make the backend able to serve [`GenerationBackend::generate`]
    ///
    /// For the local session this loads the model when unloaded; for a
    /// remote provider it verifies connectivity and credentials.
    async fn ensure_ready(&self, config: &ModelConfig) -> Result<(), SessionError>;

    /// Start a generation and return its token stream
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, SessionError>;

    /// Request cooperative cancellation of the in-flight generation
    fn cancel(&self);
}
