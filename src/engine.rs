//! Public Facade (C10): the only entry point host code talks to.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::{join_all, Shared, FutureExt};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::instrument;

use crate::analysis::{self, AnalysisOptions};
use crate::config::{EngineConfig, InitializeOptions};
use crate::definition::{self, DefinitionFile};
use crate::discovery;
use crate::error::{EngineError, Result};
use crate::intellisense::IntellisenseConfiguration;
use crate::registry::Registry;
use crate::toolset::{compare_for_identify, name_matches_pattern, Toolset};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct Inner {
    config: EngineConfig,
    definitions: RwLock<Vec<DefinitionFile>>,
    registry: Registry,
    initialized: Mutex<bool>,
    init_lock: AsyncMutex<()>,
    discovery_in_progress: Mutex<std::collections::HashMap<String, Shared<BoxFuture<()>>>>,
    identify_in_progress: Mutex<std::collections::HashMap<String, Shared<BoxFuture<Option<Arc<Toolset>>>>>>,
    subprocess_permits: Arc<Semaphore>,
}

/// The embedder-facing handle. Cheap to clone (an `Arc` internally); every clone shares the same
/// registry, caches, and in-progress maps.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_subprocesses.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                definitions: RwLock::new(Vec::new()),
                registry: Registry::default(),
                initialized: Mutex::new(false),
                init_lock: AsyncMutex::new(()),
                discovery_in_progress: Mutex::new(std::collections::HashMap::new()),
                identify_in_progress: Mutex::new(std::collections::HashMap::new()),
                subprocess_permits: permits,
            }),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if *self.inner.initialized.lock().unwrap() {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    /// Idempotent: a second call awaits the first's completion rather than racing it. Unless
    /// `options.quick` is set, the registry and every in-progress discovery/identify task are
    /// reset before the configured roots are reloaded.
    #[instrument(skip(self, folders))]
    pub async fn initialize(&self, folders: Vec<PathBuf>, options: InitializeOptions) -> Result<()> {
        let _guard = self.inner.init_lock.lock().await;

        let quick = options.quick || self.inner.config.quick;
        if !quick {
            self.inner.registry.reset();
            self.inner.discovery_in_progress.lock().unwrap().clear();
            self.inner.identify_in_progress.lock().unwrap().clear();
        }

        let roots = if folders.is_empty() { self.inner.config.definition_roots.clone() } else { folders };
        let loaded = definition::load_definitions(&roots).await;
        let loaded: Vec<DefinitionFile> = loaded.into_iter().map(|d| d.with_conditions_applied()).collect();
        *self.inner.definitions.write().unwrap() = loaded;

        let storage_path = options.storage_path.or_else(|| self.inner.config.storage_path.clone());
        self.inner.registry.set_storage_path(storage_path).await;

        *self.inner.initialized.lock().unwrap() = true;
        Ok(())
    }

    /// Ensures every loaded definition has been (or is being) searched, then returns the
    /// registry's current contents. Per-definition discovery runs concurrently — each is its own
    /// `tokio::spawn`ed task — and this only waits for all of them to finish.
    pub async fn get_toolsets(&self) -> Result<BTreeMap<PathBuf, Arc<Toolset>>> {
        self.ensure_initialized()?;

        let definitions = self.inner.definitions.read().unwrap().clone();
        let waits: Vec<_> = definitions.iter().map(|d| self.discovery_future(d.clone())).collect();
        join_all(waits).await;
        Ok(self.inner.registry.all())
    }

    /// Spawns (or reuses an already-spawned) discovery task for `definition` and returns a
    /// `Shared` handle to it, so concurrent callers for the same definition await one task
    /// instead of racing duplicate discovery runs.
    fn discovery_future(&self, definition: DefinitionFile) -> Shared<BoxFuture<()>> {
        let mut map = self.inner.discovery_in_progress.lock().unwrap();
        if let Some(existing) = map.get(&definition.name) {
            return existing.clone();
        }
        let name = definition.name.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let found = discovery::search_for_toolsets(&definition, &inner.config).await;
            for toolset in found {
                inner.registry.register(toolset);
            }
            inner.registry.persist().await;
        });
        let fut: BoxFuture<()> = async move {
            let _ = handle.await;
        }
        .boxed();
        let shared = fut.shared();
        map.insert(name, shared.clone());
        shared
    }

    /// Resolves `candidate` to a [`Toolset`]: a direct path is verified in place; otherwise it's
    /// matched as a `*`-glob pattern against registered toolset names (newest version first),
    /// triggering a full `get_toolsets` pass once if nothing matches yet.
    pub async fn identify_toolset(&self, candidate: &str) -> Result<Option<Arc<Toolset>>> {
        self.ensure_initialized()?;

        let path = Path::new(candidate);
        if path.is_absolute() && path.is_file() {
            return Ok(self.identify_by_path(path).await);
        }

        if let Some(found) = self.match_existing(candidate) {
            return Ok(Some(found));
        }
        self.get_toolsets().await?;
        Ok(self.match_existing(candidate))
    }

    fn match_existing(&self, pattern: &str) -> Option<Arc<Toolset>> {
        let mut matches: Vec<Arc<Toolset>> = self
            .inner
            .registry
            .by_name()
            .into_iter()
            .filter(|t| name_matches_pattern(t.name(), pattern))
            .collect();
        matches.sort_by(|a, b| compare_for_identify(a, b));
        matches.into_iter().next()
    }

    async fn identify_by_path(&self, candidate: &Path) -> Option<Arc<Toolset>> {
        if let Some(existing) = self.inner.registry.get(candidate) {
            return Some(existing);
        }

        let key = candidate.display().to_string();
        let shared = {
            let mut map = self.inner.identify_in_progress.lock().unwrap();
            if let Some(existing) = map.get(&key) {
                existing.clone()
            } else {
                let inner = self.inner.clone();
                let candidate = candidate.to_path_buf();
                let fut: BoxFuture<Option<Arc<Toolset>>> = async move {
                    let definitions = inner.definitions.read().unwrap().clone();
                    let stem = candidate.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                    for definition in definitions {
                        if !binary_names_match(&definition, &candidate, stem) {
                            continue;
                        }
                        if let Some(intellisense) = discovery::verify(&candidate, &definition).await {
                            let toolset = Toolset::new(candidate.clone(), definition, intellisense);
                            inner.registry.register(toolset);
                            inner.registry.persist().await;
                            return inner.registry.get(&candidate);
                        }
                    }
                    None
                }
                .boxed();
                let shared = fut.shared();
                map.insert(key.clone(), shared.clone());
                shared
            }
        };
        let result = shared.await;
        self.inner.identify_in_progress.lock().unwrap().remove(&key);
        result
    }

    pub async fn get_intellisense_configuration(
        &self,
        toolset: &Toolset,
        compiler_args: &[String],
        options: &AnalysisOptions,
    ) -> Result<IntellisenseConfiguration> {
        self.ensure_initialized()?;
        analysis::get_intellisense_configuration(
            toolset,
            compiler_args,
            options,
            &self.inner.config,
            &self.inner.subprocess_permits,
        )
        .await
    }
}

fn binary_names_match(definition: &DefinitionFile, candidate: &Path, stem: &str) -> bool {
    let names = definition.discover_binary_names();
    if cfg!(windows) {
        let file_name = candidate.file_name().and_then(|n| n.to_str()).unwrap_or("");
        names.iter().any(|n| n == stem || n.eq_ignore_ascii_case(file_name))
    } else {
        names.iter().any(|n| n == stem)
    }
}
