//! Model evaluator seam
//!
//! The engine treats the underlying model runtime as an opaque capability:
//! load a weights file, produce the next token, release memory on drop.
//! Numerical internals live entirely behind these traits, so a llama.cpp
//! or candle backed evaluator slots in without touching callers.

use crate::types::{GenerationRequest, ModelConfig};
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by the underlying model runtime
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// The runtime rejected the model file or configuration
    #[error("Evaluator rejected model: {0}")]
    Load(String),

    /// The runtime faulted while producing tokens
    #[error("Evaluator fault: {0}")]
    Fault(String),
}

/// Factory for loaded models
pub trait ModelEvaluator: Send + Sync + 'static {
    type Model: LoadedModel;

    /// Load model weights from a local file
    ///
    /// Blocking and potentially slow; the session runs it off the async
    /// executor.
    fn load(&self, path: &Path, config: &ModelConfig) -> Result<Self::Model, EvaluatorError>;
}

/// A resident model able to generate tokens
///
/// Memory is released by dropping the value.
pub trait LoadedModel: Send + 'static {
    /// Feed the prompt and prepare to generate
    fn begin(&mut self, request: &GenerationRequest) -> Result<(), EvaluatorError>;

    /// Produce the next token fragment; `None` means natural end of stream
    fn next_token(&mut self) -> Result<Option<String>, EvaluatorError>;
}

/// Scripted evaluator used across the crate's tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Evaluator that replays a fixed token script
    pub struct ScriptedEvaluator {
        pub tokens: Vec<String>,
        /// Reject `load` outright when set
        pub fail_load: bool,
        /// Fault after producing this many tokens
        pub fail_after: Option<usize>,
        /// Pause between tokens, to give tests time to cancel
        pub token_delay: Option<Duration>,
        /// Number of successful loads performed
        pub load_count: Arc<AtomicUsize>,
        /// Prompts seen by `begin`
        pub seen_prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedEvaluator {
        pub fn speaking(tokens: &[&str]) -> Self {
            Self {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                fail_load: false,
                fail_after: None,
                token_delay: None,
                load_count: Arc::new(AtomicUsize::new(0)),
                seen_prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ModelEvaluator for ScriptedEvaluator {
        type Model = ScriptedModel;

        fn load(&self, _path: &Path, _config: &ModelConfig) -> Result<ScriptedModel, EvaluatorError> {
            if self.fail_load {
                return Err(EvaluatorError::Load("scripted load failure".into()));
            }
            self.load_count.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedModel {
                tokens: self.tokens.clone(),
                cursor: 0,
                fail_after: self.fail_after,
                token_delay: self.token_delay,
                seen_prompts: self.seen_prompts.clone(),
            })
        }
    }

    pub struct ScriptedModel {
        tokens: Vec<String>,
        cursor: usize,
        fail_after: Option<usize>,
        token_delay: Option<Duration>,
        seen_prompts: Arc<Mutex<Vec<String>>>,
    }

    impl LoadedModel for ScriptedModel {
        fn begin(&mut self, request: &GenerationRequest) -> Result<(), EvaluatorError> {
            self.cursor = 0;
            self.seen_prompts.lock().unwrap().push(request.prompt.clone());
            Ok(())
        }

        fn next_token(&mut self) -> Result<Option<String>, EvaluatorError> {
            if let Some(delay) = self.token_delay {
                std::thread::sleep(delay);
            }
            if Some(self.cursor) == self.fail_after {
                return Err(EvaluatorError::Fault("scripted mid-stream fault".into()));
            }
            let token = self.tokens.get(self.cursor).cloned();
            self.cursor += 1;
            Ok(token)
        }
    }
}
