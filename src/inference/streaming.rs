//! Token streaming
//!
//! Generation output is a pull-based sequence of token fragments over a
//! bounded channel, so backpressure and cancellation are structural: the
//! producing worker blocks when the consumer lags and observes the cancel
//! flag at every token boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a generation stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A stop sequence matched a suffix of the accumulated output
    Stop,
    /// The requested token budget was reached
    MaxTokens,
    /// The model produced its natural end of stream
    EndOfStream,
    /// Cancellation was observed at a token boundary
    Cancelled,
}

/// A single item on a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamToken {
    /// One token fragment of output text
    Token(String),
    /// The stream finished normally; no further tokens follow
    Done(FinishReason),
    /// The evaluator faulted mid-stream; no further tokens follow
    Error(String),
}

/// Cooperative cancellation flag shared between a stream's producer and
/// whoever requested the work
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the next token boundary
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm the flag before a new generation
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Buffered tokens between producer and consumer; small, so a slow
/// consumer promptly backpressures the worker
pub(crate) const STREAM_BUFFER: usize = 32;

/// Pull-based stream of generation output
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<StreamToken>,
}

impl TokenStream {
    pub(crate) fn channel() -> (mpsc::Sender<StreamToken>, TokenStream) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, TokenStream { rx })
    }

    /// Next item, or `None` once the stream is exhausted
    pub async fn next(&mut self) -> Option<StreamToken> {
        self.rx.recv().await
    }

    /// Drain the stream, returning the accumulated text and how it ended
    ///
    /// `Err` carries the fault message when the stream ended with
    /// [`StreamToken::Error`].
    pub async fn collect_text(mut self) -> (String, Result<FinishReason, String>) {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item {
                StreamToken::Token(fragment) => text.push_str(&fragment),
                StreamToken::Done(reason) => return (text, Ok(reason)),
                StreamToken::Error(message) => return (text, Err(message)),
            }
        }
        // Producer vanished without a terminal item; treat as a fault
        (text, Err("stream ended unexpectedly".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_roundtrip() {
        let flag = CancelFlag::new();
        assert!(!flag.requested());
        flag.request();
        assert!(flag.requested());
        flag.reset();
        assert!(!flag.requested());
    }

    #[tokio::test]
    async fn test_collect_text_accumulates_until_done() {
        let (tx, stream) = TokenStream::channel();
        tx.send(StreamToken::Token("Hel".into())).await.unwrap();
        tx.send(StreamToken::Token("lo".into())).await.unwrap();
        tx.send(StreamToken::Done(FinishReason::EndOfStream))
            .await
            .unwrap();
        drop(tx);

        let (text, outcome) = stream.collect_text().await;
        assert_eq!(text, "Hello");
        assert_eq!(outcome, Ok(FinishReason::EndOfStream));
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_faults() {
        let (tx, stream) = TokenStream::channel();
        tx.send(StreamToken::Token("partial".into())).await.unwrap();
        tx.send(StreamToken::Error("boom".into())).await.unwrap();
        drop(tx);

        let (text, outcome) = stream.collect_text().await;
        assert_eq!(text, "partial");
        assert_eq!(outcome, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_producer_is_not_a_silent_finish() {
        let (tx, stream) = TokenStream::channel();
        tx.send(StreamToken::Token("cut".into())).await.unwrap();
        drop(tx);

        let (text, outcome) = stream.collect_text().await;
        assert_eq!(text, "cut");
        assert!(outcome.is_err());
    }
}
