//! The IntelliSense configuration document (§3 of the spec).
//!
//! Per the "dynamic-typed fragments" design note, this is modeled as a generic JSON tree with
//! typed read/write accessors projected at the boundaries that need them (post-processing, path
//! validation, the public facade). Definitions and query results merge arbitrary fragments into
//! this tree; nothing here assumes a fixed schema beyond the handful of fields the engine itself
//! reads or writes.

use crate::merge::merge;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The resolved view of include paths, macros, language, standard and parser arguments for one
/// translation unit. Wraps a [`Value`] so that arbitrary definition-authored fields survive
/// round-trips even though the engine only has typed accessors for the "mandatory semantic
/// fields" the spec names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntellisenseConfiguration(pub Value);

impl IntellisenseConfiguration {
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn merge_fragment(&mut self, fragment: &Value) {
        merge(&mut self.0, fragment);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.0, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.0, path, value);
    }

    pub fn compiler_path(&self) -> Option<&str> {
        self.get_str("compilerPath")
    }

    pub fn language(&self) -> Option<&str> {
        self.get_str("language")
    }

    pub fn standard(&self) -> Option<&str> {
        self.get_str("standard")
    }

    /// Ordered `name -> value` pairs. Relies on the crate's `serde_json/preserve_order` feature
    /// to keep `macros`/`defines` in definition order rather than sorted by key.
    pub fn macros(&self) -> Vec<(String, String)> {
        string_map_entries(self.get("macros"))
    }

    pub fn string_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn parser_arguments(&self) -> Vec<String> {
        self.string_list("parserArguments")
    }

    pub fn set_parser_arguments(&mut self, args: Vec<String>) {
        self.set("parserArguments", Value::Array(args.into_iter().map(Value::String).collect()));
    }
}

fn string_map_entries(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_default()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads a dotted path (`"include.paths"`) out of a JSON tree.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

/// Writes a dotted path into a JSON tree, creating intermediate objects as needed.
pub fn set_path(root: &mut Value, path: &str, new_value: Value) {
    let mut parts = path.split('.').peekable();
    let mut cur = root;
    while let Some(part) = parts.next() {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let map = cur.as_object_mut().expect("just ensured object");
        if parts.peek().is_none() {
            map.insert(part.to_string(), new_value);
            return;
        }
        cur = map.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}
