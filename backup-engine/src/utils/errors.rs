//! Error taxonomy for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error while {context}: {source}")]
    IoContext {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Wrap an I/O error with a short description of what was being attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoContext {
            context: context.into(),
            source,
        }
    }

    /// Wire-level error kind reported to the dispatch layer
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Pattern(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::IoContext { .. } | Self::Io(_) | Self::Serialization(_) => "IOError",
            Self::Cancelled => "CancelledError",
            Self::Config(_) => "ConfigError",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<globset::Error> for EngineError {
    fn from(err: globset::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
