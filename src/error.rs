// Error types shared by every store in the core
// Stores return these instead of panicking; reads fall back to empty values

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Unknown playlist or track id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Empty name, non-positive duration, empty track list
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Writing to stable storage failed; in-memory state was left untouched
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// File deletion or scan failure
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The playback engine refused to start or seek a track
    #[error("Playback engine error: {0}")]
    Engine(String),
}

impl CoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        CoreError::NotFound(what.to_string())
    }

    pub fn invalid(what: impl std::fmt::Display) -> Self {
        CoreError::InvalidInput(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
