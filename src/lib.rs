//! PocketLM Library
//!
//! On-device chat inference orchestration: decides what model configuration
//! to run, owns the loaded/unloaded model lifecycle, builds bounded prompts
//! from unbounded history, and drives cancellable token-by-token generation.

pub mod chat;
pub mod inference;
pub mod logging;
pub mod net;
pub mod storage;
pub mod system;
pub mod types;
