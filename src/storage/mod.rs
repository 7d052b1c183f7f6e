//! Persistent storage
//!
//! This module handles data persistence for conversations and engine
//! settings, and local management of model artifacts.

pub mod assets;
pub mod conversations;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(uuid::Uuid),

    #[error("Message not found: {0}")]
    MessageNotFound(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Get the application data directory, creating it if necessary
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    let dirs = ProjectDirs::from("com", "pocketlm", "PocketLM").ok_or(StorageError::NoDataDir)?;
    let dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
