//! Chat orchestration
//!
//! Drives one user turn end to end: persist the user message, build a
//! bounded prompt from history, make the backend ready, stream tokens to
//! the caller, and persist the assistant message. Failures never roll
//! back already-persisted input, and a failed turn is always distinct
//! from a successful empty response.

pub mod prompt;

use crate::inference::{FinishReason, GenerationBackend, SessionError, StreamToken, TokenStream};
use crate::storage::conversations::ConversationStore;
use crate::storage::settings::EngineSettings;
use crate::storage::StorageError;
use crate::system::power::ThrottleDecision;
use crate::system::{hardware, power};
use crate::types::{GenerationRequest, Role};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Maximum characters of the first user message used as a conversation title
const TITLE_LEN: usize = 20;

/// Turn-level errors
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub conversation_id: Uuid,
    /// Persisted assistant message, when one was written
    pub message_id: Option<Uuid>,
    /// Full assistant output (partial when cancelled)
    pub content: String,
    pub finish: FinishReason,
}

/// Incremental output of an in-flight turn
#[derive(Debug)]
pub enum TurnEvent {
    /// One token fragment of assistant output
    Token(String),
    /// The turn finished and its result was persisted
    Completed(TurnReport),
    /// The turn failed; previously persisted messages are intact
    Failed(TurnError),
}

/// Handle on an in-flight turn
pub struct Turn {
    pub conversation_id: Uuid,
    events: mpsc::UnboundedReceiver<TurnEvent>,
    backend: Arc<dyn GenerationBackend>,
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

impl Turn {
    /// Next incremental event; `None` after a terminal event was taken
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Request cooperative cancellation of the turn's generation
    pub fn cancel(&self) {
        self.backend.cancel();
    }

    /// Drain the turn to completion, discarding incremental tokens
    pub async fn collect(mut self) -> Result<TurnReport, TurnError> {
        while let Some(event) = self.events.recv().await {
            match event {
                TurnEvent::Token(_) => {}
                TurnEvent::Completed(report) => return Ok(report),
                TurnEvent::Failed(error) => return Err(error),
            }
        }
        Err(TurnError::Session(SessionError::GenerationFault(
            "turn ended without a result".to_string(),
        )))
    }
}

/// Drives full chat turns against a store and a generation backend
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn GenerationBackend>,
    settings: EngineSettings,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        backend: Arc<dyn GenerationBackend>,
        mut settings: EngineSettings,
    ) -> Self {
        settings.validate();
        Self {
            store,
            backend,
            settings,
        }
    }

    /// Run one user turn
    ///
    /// The user message is persisted before anything can fail downstream;
    /// a new conversation is created when none is given. Returns a
    /// [`Turn`] streaming the assistant's output; the assistant message
    /// is persisted when the stream completes.
    pub async fn send_message(
        &self,
        conversation: Option<Uuid>,
        text: &str,
    ) -> Result<Turn, TurnError> {
        let conversation_id = match conversation {
            Some(id) => id,
            None => self.store.create_conversation(&title_for(text)).await?,
        };
        self.store
            .append_message(conversation_id, Role::User, text)
            .await?;

        let history = self.store.list_messages(conversation_id).await?;

        let config = hardware::recommend_config();
        let throttle = power::should_throttle();
        let max_tokens = effective_max_tokens(&self.settings, &throttle);

        // Reserve the response budget inside the recommended context
        let window_budget = config.context_size.saturating_sub(max_tokens).max(1);
        let mut rendered = prompt::build_window(&history, window_budget);
        rendered.push_str("Assistant:");

        let mut request =
            GenerationRequest::new(rendered, max_tokens, self.settings.stop_sequences.clone());
        request.sampling = self.settings.sampling;

        self.backend.ensure_ready(&config).await?;
        let stream = self.backend.generate(request).await?;

        let (tx, events) = mpsc::unbounded_channel();
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = drive_turn(store, conversation_id, stream, &tx).await;
            let event = match result {
                Ok(report) => TurnEvent::Completed(report),
                Err(error) => {
                    tracing::warn!("Turn failed: {error}");
                    TurnEvent::Failed(error)
                }
            };
            let _ = tx.send(event);
        });

        Ok(Turn {
            conversation_id,
            events,
            backend: self.backend.clone(),
        })
    }
}

/// Consume the token stream, forwarding fragments to the caller, then
/// persist the assistant message
async fn drive_turn(
    store: Arc<dyn ConversationStore>,
    conversation_id: Uuid,
    mut stream: TokenStream,
    tx: &mpsc::UnboundedSender<TurnEvent>,
) -> Result<TurnReport, TurnError> {
    let mut content = String::new();
    let finish = loop {
        match stream.next().await {
            Some(StreamToken::Token(fragment)) => {
                content.push_str(&fragment);
                let _ = tx.send(TurnEvent::Token(fragment));
            }
            Some(StreamToken::Done(reason)) => break reason,
            Some(StreamToken::Error(message)) => {
                return Err(TurnError::Session(SessionError::GenerationFault(message)));
            }
            None => {
                return Err(TurnError::Session(SessionError::GenerationFault(
                    "stream ended unexpectedly".to_string(),
                )));
            }
        }
    };

    // A cancelled turn keeps its partial output only when there is some;
    // a completed-but-empty response is still persisted
    let message_id = if finish == FinishReason::Cancelled && content.is_empty() {
        None
    } else {
        Some(
            store
                .append_message(conversation_id, Role::Assistant, &content)
                .await?,
        )
    };

    Ok(TurnReport {
        conversation_id,
        message_id,
        content,
        finish,
    })
}

/// Apply the power guard's advisory recommendation to the response budget
fn effective_max_tokens(settings: &EngineSettings, throttle: &ThrottleDecision) -> u32 {
    if throttle.throttle {
        tracing::info!(
            "Throttling generation budget to {} tokens ({})",
            settings.throttled_max_tokens,
            throttle.reason.as_deref().unwrap_or("no reason given")
        );
        settings.throttled_max_tokens
    } else {
        settings.max_tokens
    }
}

/// Conversation title: the first characters of the opening message
fn title_for(text: &str) -> String {
    text.chars().take(TITLE_LEN).collect()
}
