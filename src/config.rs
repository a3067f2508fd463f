//! Host-supplied configuration for the engine.

use std::path::PathBuf;

/// Construction-time configuration. Immutable once passed to [`crate::Engine::initialize`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directories searched (non-recursively) for `toolset.*.json` definition files.
    pub definition_roots: Vec<PathBuf>,
    /// Directory the persistent cache (`detected-toolsets.json`) is written under. `None`
    /// disables the persistent cache entirely.
    pub storage_path: Option<PathBuf>,
    /// When set, `initialize` reuses the previously loaded definitions/registry instead of
    /// resetting them.
    pub quick: bool,
    /// Upper bound on concurrently running compiler query subprocesses.
    pub max_concurrent_subprocesses: usize,
    /// Upper bound on concurrently open directory reads during a filesystem walk.
    pub max_concurrent_directory_reads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            definition_roots: Vec::new(),
            storage_path: None,
            quick: false,
            max_concurrent_subprocesses: num_cpus::get(),
            max_concurrent_directory_reads: 64,
        }
    }
}

/// Options accepted by `Engine::initialize`.
#[derive(Clone, Debug, Default)]
pub struct InitializeOptions {
    pub quick: bool,
    pub storage_path: Option<PathBuf>,
}
