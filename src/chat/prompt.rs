//! Prompt window building
//!
//! Turns unbounded conversation history into a bounded prompt. Token cost
//! uses a fixed 4-characters-per-token heuristic; it is an approximation,
//! not real tokenization, and is kept behind [`estimate_tokens`] so an
//! exact tokenizer could replace it without touching callers.

use crate::types::{Message, Role};

const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a piece of text (ceiling of len / 4)
pub fn estimate_tokens(text: &str) -> u32 {
    text.len().div_ceil(CHARS_PER_TOKEN) as u32
}

/// Render one message the way the model sees it
fn render(role: Role, content: &str) -> String {
    format!("{}: {}\n", role.label(), content)
}

/// Build a prompt from history under a token budget
///
/// Walks from the most recent message backwards, accumulating whole
/// messages until the next one would overflow the budget; that message
/// and everything older is dropped, never truncated mid-message. The
/// output preserves chronological order. If even the single most recent
/// message exceeds the budget it is still included alone: the budget is
/// a soft target, not a truncation of the latest turn.
///
/// Deterministic and side-effect free.
pub fn build_window(history: &[Message], token_budget: u32) -> String {
    let mut included: Vec<String> = Vec::new();
    let mut used: u32 = 0;

    for message in history.iter().rev() {
        let rendered = render(message.role, &message.content);
        let cost = estimate_tokens(&rendered);

        if used + cost > token_budget {
            if included.is_empty() {
                included.push(rendered);
            }
            break;
        }

        included.push(rendered);
        used += cost;
    }

    included.reverse();
    included.concat()
}
