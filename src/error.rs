//! Error types shared by every fallible operation in the engine.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can cross the public facade boundary.
///
/// Most failures inside a single definition or candidate (malformed definition file, a candidate
/// that fails discovery, a query subprocess that exits non-zero) are swallowed at the point where
/// they occur and never become an `EngineError`. What's left here is the small set of failures
/// that are allowed to propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Any facade call other than `initialize` before initialization has completed.
    #[error("toolset engine has not been initialized")]
    NotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse definition file {path}: {reason}")]
    DefinitionParse { path: PathBuf, reason: String },

    #[error(transparent)]
    Cache(#[from] serde_json::Error),
}
