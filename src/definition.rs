//! Definition Loader (C6) and the `DefinitionFile` data model (§3).

use crate::error::{EngineError, Result};
use crate::merge::merge;
use crate::render::{evaluate_expression, NullResolver};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// `inherits` may name one parent definition or several, applied in order (later entries take
/// precedence, same as later keys in an object merge).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inherits {
    One(String),
    Many(Vec<String>),
}

impl Inherits {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// A declarative description of one family of compilers, as loaded from a `toolset.*.json` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionFile {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub inherits: Option<Inherits>,
    #[serde(default = "default_object")]
    pub intellisense: Value,
    #[serde(default)]
    pub discover: Map<String, Value>,
    #[serde(default)]
    pub analysis: Map<String, Value>,
    #[serde(default)]
    pub conditions: Option<Map<String, Value>>,
}

fn default_object() -> Value {
    Value::Object(Map::new())
}

impl DefinitionFile {
    /// Returns the names this definition's `discover.binary` block lists, used both to seed the
    /// Fast Finder and to narrow `identify_toolset`'s direct-candidate path.
    pub fn discover_binary_names(&self) -> Vec<String> {
        match self.discover.get("binary") {
            Some(Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Evaluates `conditions` once (bare resolver, no compiler context) and merges every
    /// satisfied condition's fragment into a clone of this definition.
    pub fn with_conditions_applied(&self) -> Self {
        let Some(conditions) = &self.conditions else {
            return self.clone();
        };
        let mut out = self.clone();
        let data = serde_json::to_value(&out).unwrap_or(Value::Null);
        let resolver = NullResolver;
        for (expr, fragment) in conditions {
            if evaluate_expression(expr, &data, &resolver) {
                let mut as_value = serde_json::to_value(&out).unwrap_or(Value::Null);
                merge(&mut as_value, fragment);
                if let Ok(merged) = serde_json::from_value(as_value) {
                    out = merged;
                }
            }
        }
        out
    }
}

/// Loads every `toolset.*.json` definition under `roots`, resolving `inherits` transitively.
/// Malformed files are logged and skipped, never surfaced as an error — see `7. ERROR HANDLING
/// DESIGN`.
#[instrument(skip(roots))]
pub async fn load_definitions(roots: &[PathBuf]) -> Vec<DefinitionFile> {
    let mut raw = Vec::new();
    for root in roots {
        for path in glob_definitions(root) {
            match load_one(&path).await {
                Ok(def) => raw.push(def),
                Err(err) => warn!(path = %path.display(), %err, "skipping malformed definition"),
            }
        }
    }
    resolve_inherits(raw)
}

fn glob_definitions(root: &Path) -> Vec<PathBuf> {
    let pattern = root.join("toolset.*.json");
    let Some(pattern_str) = pattern.to_str() else {
        return Vec::new();
    };
    match glob::glob(pattern_str) {
        Ok(paths) => paths.flatten().collect(),
        Err(_) => Vec::new(),
    }
}

async fn load_one(path: &Path) -> Result<DefinitionFile> {
    let text = tokio::fs::read_to_string(path).await?;
    let value: Value = json5::from_str(&text)
        .map_err(|e| EngineError::DefinitionParse { path: path.to_path_buf(), reason: e.to_string() })?;
    // `serde_path_to_error` turns a bare "invalid type" message into one pointing at the exact
    // field (e.g. `discover[0].match`), which matters once definitions start chaining `inherits`.
    serde_path_to_error::deserialize(value).map_err(|e| {
        let field_path = e.path().to_string();
        EngineError::DefinitionParse { path: path.to_path_buf(), reason: format!("{field_path}: {e}") }
    })
}

/// Resolves `inherits` by deep-merging each named parent into a clone of the child, in
/// declaration order, child winning on conflicts.
fn resolve_inherits(definitions: Vec<DefinitionFile>) -> Vec<DefinitionFile> {
    let by_name: std::collections::HashMap<String, DefinitionFile> =
        definitions.iter().map(|d| (d.name.clone(), d.clone())).collect();

    definitions
        .into_iter()
        .map(|def| {
            let Some(inherits) = def.inherits.clone() else {
                return def;
            };
            let mut base = Value::Object(Map::new());
            for parent_name in inherits.names() {
                if parent_name == def.name {
                    debug!(name = %def.name, "definition inherits from itself, ignoring");
                    continue;
                }
                if let Some(parent) = by_name.get(parent_name) {
                    if let Ok(parent_value) = serde_json::to_value(parent) {
                        merge(&mut base, &parent_value);
                    }
                } else {
                    debug!(name = %def.name, parent = parent_name, "unknown inherits target");
                }
            }
            if let Ok(child_value) = serde_json::to_value(&def) {
                merge(&mut base, &child_value);
            }
            serde_json::from_value(base).unwrap_or(def)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(json_value: Value) -> DefinitionFile {
        serde_json::from_value(json_value).unwrap()
    }

    #[test]
    fn inherits_merges_parent_before_child() {
        let base = def(json!({"name": "base", "intellisense": {"standard": "C11"}}));
        let child = def(json!({
            "name": "child",
            "inherits": "base",
            "intellisense": {"language": "c"}
        }));
        let resolved = resolve_inherits(vec![base, child]);
        let child = resolved.iter().find(|d| d.name == "child").unwrap();
        assert_eq!(child.intellisense["standard"], "C11");
        assert_eq!(child.intellisense["language"], "c");
    }

    #[test]
    fn child_wins_on_conflicting_keys() {
        let base = def(json!({"name": "base", "intellisense": {"standard": "C11"}}));
        let child = def(json!({
            "name": "child",
            "inherits": "base",
            "intellisense": {"standard": "C17"}
        }));
        let resolved = resolve_inherits(vec![base, child]);
        let child = resolved.iter().find(|d| d.name == "child").unwrap();
        assert_eq!(child.intellisense["standard"], "C17");
    }

    #[test]
    fn conditions_merge_when_truthy() {
        let d = def(json!({
            "name": "gcc",
            "conditions": { "true": { "intellisense": { "language": "cpp" } } }
        }));
        let resolved = d.with_conditions_applied();
        assert_eq!(resolved.intellisense["language"], "cpp");
    }

    #[tokio::test]
    async fn malformed_definition_reports_the_offending_field_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolset.broken.json");
        // `discover` must be an object; giving it a string should fail right there, not with a
        // generic top-level "invalid type" message.
        tokio::fs::write(&path, r#"{"name": "gcc", "discover": "nope"}"#).await.unwrap();

        let err = load_one(&path).await.unwrap_err();
        match err {
            EngineError::DefinitionParse { reason, .. } => assert!(
                reason.contains("discover"),
                "expected the error to name the `discover` field, got: {reason}"
            ),
            other => panic!("expected DefinitionParse, got {other:?}"),
        }
    }
}
