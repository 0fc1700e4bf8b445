//! Backup Engine Library
//!
//! Local versioned backup and restore with retention, emergency snapshots
//! before restores, and cooperative cancellation.

pub mod api;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod fs;
pub mod ops;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use api::Dispatcher;
pub use config::Config;
pub use engine::BackupEngine;
pub use ops::tracker::{Operation, OperationStatus, OperationTracker};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
