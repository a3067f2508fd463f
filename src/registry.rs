//! Toolset Registry & Cache (C9): process-wide identified-toolset state and its persistent
//! on-disk snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::definition::DefinitionFile;
use crate::intellisense::IntellisenseConfiguration;
use crate::toolset::Toolset;
use crate::utils::{atomic_write_json, canonical, read_json_lenient};

const CACHE_FILE_NAME: &str = "detected-toolsets.json";

/// Holds every identified [`Toolset`], keyed by its canonicalized `compilerPath`, plus the
/// directory the persistent snapshot lives under. Toolsets are `Arc`-wrapped so a caller that
/// holds on to one (to drive repeated analysis calls) isn't invalidated by a later registry reset.
pub struct Registry {
    toolsets: Mutex<BTreeMap<PathBuf, Arc<Toolset>>>,
    storage_path: Mutex<Option<PathBuf>>,
    /// A coalesced write is pending; cleared once the snapshot actually lands on disk. Guards
    /// against a burst of `register` calls each scheduling their own write.
    write_pending: Mutex<bool>,
    /// Set whenever `toolsets` changes while a write is in flight, so the writer re-snapshots and
    /// writes again before clearing `write_pending` instead of dropping the change on the floor.
    dirty_since_snapshot: Mutex<bool>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            toolsets: Mutex::new(BTreeMap::new()),
            storage_path: Mutex::new(None),
            write_pending: Mutex::new(false),
            dirty_since_snapshot: Mutex::new(false),
        }
    }
}

impl Registry {
    pub fn reset(&self) {
        self.toolsets.lock().unwrap().clear();
    }

    /// Registers `toolset` under its canonical path; a later registration for a path already
    /// present is a no-op (first writer wins, matching the spec's discovery-is-concurrent model).
    pub fn register(&self, toolset: Toolset) {
        let key = canonical(&toolset.compiler_path);
        let inserted = {
            let mut toolsets = self.toolsets.lock().unwrap();
            match toolsets.entry(key) {
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(Arc::new(toolset));
                    true
                }
                std::collections::btree_map::Entry::Occupied(_) => false,
            }
        };
        if inserted {
            *self.dirty_since_snapshot.lock().unwrap() = true;
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Toolset>> {
        self.toolsets.lock().unwrap().get(&canonical(path)).cloned()
    }

    pub fn all(&self) -> BTreeMap<PathBuf, Arc<Toolset>> {
        self.toolsets.lock().unwrap().clone()
    }

    pub fn by_name(&self) -> Vec<Arc<Toolset>> {
        self.toolsets.lock().unwrap().values().cloned().collect()
    }

    /// Writes the current registry contents to disk. Coalesces: if a write is already in flight
    /// this call just flags it dirty and returns, trusting the in-flight write to loop and cover
    /// this registration too rather than queuing a second write behind it.
    #[instrument(skip(self))]
    pub async fn persist(&self) {
        {
            let mut pending = self.write_pending.lock().unwrap();
            if *pending {
                *self.dirty_since_snapshot.lock().unwrap() = true;
                return;
            }
            *pending = true;
        }

        let Some(storage_path) = self.storage_path.lock().unwrap().clone() else {
            *self.write_pending.lock().unwrap() = false;
            return;
        };
        let path = storage_path.join(CACHE_FILE_NAME);

        loop {
            *self.dirty_since_snapshot.lock().unwrap() = false;
            let document = self.to_document();
            if let Err(err) = atomic_write_json(&path, &document).await {
                debug!(%err, "failed to write toolset cache snapshot");
            }
            if !*self.dirty_since_snapshot.lock().unwrap() {
                break;
            }
        }
        *self.write_pending.lock().unwrap() = false;
    }

    fn to_document(&self) -> Value {
        let toolsets = self.toolsets.lock().unwrap();
        let mut object = serde_json::Map::new();
        for (path, toolset) in toolsets.iter() {
            let queries: Value = serde_json::to_value(&*toolset.query_cache.lock().unwrap()).unwrap_or_default();
            let analysis: Value = serde_json::to_value(&*toolset.analysis_cache.lock().unwrap()).unwrap_or_default();
            let entry = serde_json::json!({
                "compilerPath": toolset.compiler_path,
                "definition": toolset.definition,
                "intellisense": toolset.intellisense.0,
                "queries": queries,
                "analysis": analysis,
            });
            object.insert(path.display().to_string(), entry);
        }
        Value::Object(object)
    }

    /// Rehydrates toolsets from a previously written snapshot. Entries that no longer parse, or
    /// whose `compilerPath` no longer exists on disk, are dropped silently.
    #[instrument(skip(self))]
    pub async fn load_cached_entries(&self, storage_path: &Path) {
        let path = storage_path.join(CACHE_FILE_NAME);
        let Some(Value::Object(entries)) = read_json_lenient(&path).await else {
            return;
        };

        for (path_str, entry) in entries {
            let compiler_path = PathBuf::from(&path_str);
            if !compiler_path.exists() {
                debug!(path = %path_str, "dropping cached toolset whose binary no longer exists");
                continue;
            }
            let Some(definition) = entry.get("definition").cloned() else { continue };
            let definition: DefinitionFile = match serde_json::from_value(definition) {
                Ok(d) => d,
                Err(err) => {
                    debug!(%err, path = %path_str, "dropping malformed cached definition");
                    continue;
                }
            };
            let intellisense = entry
                .get("intellisense")
                .cloned()
                .map(IntellisenseConfiguration)
                .unwrap_or_else(IntellisenseConfiguration::new);
            let query_cache: std::collections::HashMap<String, String> =
                entry.get("queries").cloned().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
            let analysis_cache: std::collections::HashMap<String, IntellisenseConfiguration> = entry
                .get("analysis")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();

            self.register(Toolset::with_caches(compiler_path, definition, intellisense, query_cache, analysis_cache));
        }
    }

    /// Sets the directory the persistent snapshot lives under, and eagerly rehydrates from it
    /// (the on-`initialize` load step; a `None` path disables the persistent cache entirely).
    pub async fn set_storage_path(&self, storage_path: Option<PathBuf>) {
        *self.storage_path.lock().unwrap() = storage_path.clone();
        if let Some(storage_path) = storage_path {
            self.load_cached_entries(&storage_path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> DefinitionFile {
        serde_json::from_value(json!({"name": "gcc"})).unwrap()
    }

    #[tokio::test]
    async fn persisted_analysis_cache_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("gcc");
        std::fs::write(&compiler, b"fake").unwrap();

        let mut intellisense = IntellisenseConfiguration::new();
        intellisense.set("version", json!("12.2.0"));
        let toolset = Toolset::new(compiler.clone(), definition(), intellisense);
        toolset
            .query_cache
            .lock()
            .unwrap()
            .insert("gcc -dM -E -".to_string(), "#define __GNUC__ 12\n".to_string());
        let mut cached = IntellisenseConfiguration::new();
        cached.set("standard", json!("C++17"));
        toolset.analysis_cache.lock().unwrap().insert("-std=c++17".to_string(), cached);

        let registry = Registry::default();
        registry.register(toolset);
        registry.set_storage_path(Some(dir.path().to_path_buf())).await;
        registry.persist().await;

        let reloaded = Registry::default();
        reloaded.set_storage_path(Some(dir.path().to_path_buf())).await;

        let restored = reloaded.get(&compiler).expect("toolset reloaded");
        assert_eq!(
            restored.query_cache.lock().unwrap().get("gcc -dM -E -"),
            Some(&"#define __GNUC__ 12\n".to_string())
        );
        let restored_analysis = restored.analysis_cache.lock().unwrap();
        let cached_config = restored_analysis.get("-std=c++17").expect("analysis cache entry reloaded");
        assert_eq!(cached_config.get_str("standard"), Some("C++17"));
    }

    #[tokio::test]
    async fn reload_drops_entries_whose_binary_no_longer_exists() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("gcc");
        std::fs::write(&compiler, b"fake").unwrap();

        let registry = Registry::default();
        registry.register(Toolset::new(compiler.clone(), definition(), IntellisenseConfiguration::new()));
        registry.set_storage_path(Some(dir.path().to_path_buf())).await;
        registry.persist().await;

        std::fs::remove_file(&compiler).unwrap();

        let reloaded = Registry::default();
        reloaded.set_storage_path(Some(dir.path().to_path_buf())).await;
        assert!(reloaded.get(&compiler).is_none());
    }
}
