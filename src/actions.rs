//! Action Parser (C3): decodes the ordered, flagged keys of a `discover`/`analysis` block into a
//! priority-sorted action stream.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// One parsed entry from an action block.
#[derive(Clone, Debug)]
pub struct ParsedAction {
    /// Canonical action name from the caller's action table (e.g. `"match"`, `"expression"`).
    pub action: &'static str,
    /// The original key, kept for diagnostics.
    pub key: String,
    /// The value the key mapped to.
    pub block: Value,
    /// Flags declared valid for `action`, restricted from whatever the key carried.
    pub flags: HashMap<String, Option<String>>,
    /// Execution order: `flags["priority"]` if present and parseable, else positional index.
    pub priority: i64,
}

impl ParsedAction {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.flags.get(name).and_then(|v| v.as_deref())
    }
}

/// `(action name, legal flags for that action)`.
pub type ActionTable = &'static [(&'static str, &'static [&'static str])];

/// Parses every key of `map` against `table`, discarding unrecognized actions, and returns the
/// entries ordered ascending by priority (stable: source order breaks ties).
pub fn parse_actions(map: &Map<String, Value>, table: ActionTable) -> Vec<ParsedAction> {
    let mut parsed: Vec<ParsedAction> = map
        .iter()
        .enumerate()
        .filter_map(|(index, (key, value))| parse_one(key, value, table, index as i64))
        .collect();
    parsed.sort_by_key(|a| a.priority);
    parsed
}

fn parse_one(key: &str, value: &Value, table: ActionTable, positional: i64) -> Option<ParsedAction> {
    // Strip a trailing `#comment`.
    let without_comment = key.split('#').next().unwrap_or(key);
    let mut parts = without_comment.splitn(2, ':');
    let word = parts.next().unwrap_or("").trim();
    let flags_str = parts.next();

    let first_four: String = word.chars().take(4).collect::<String>().to_lowercase();
    let (action, legal_flags) = table
        .iter()
        .find(|(prefix, _)| prefix.to_lowercase().starts_with(&first_four))?;

    let mut flags = HashMap::new();
    if let Some(flags_str) = flags_str {
        for raw in flags_str.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (name, val) = match raw.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().to_string())),
                None => (raw, None),
            };
            if legal_flags.contains(&name) {
                flags.insert(name.to_string(), val);
            }
        }
    }

    let priority = flags
        .get("priority")
        .and_then(|v| v.as_ref())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(positional);

    Some(ParsedAction { action, key: key.to_string(), block: value.clone(), flags, priority })
}

/// Action table for `discover` blocks.
pub const DISCOVER_ACTIONS: ActionTable = &[
    ("match", &["optional", "priority", "oneof"]),
    ("expression", &["oneof", "optional", "priority", "folder", "file"]),
];

/// Action table for `analysis` blocks.
pub const ANALYSIS_ACTIONS: ActionTable = &[
    ("task", &["priority", "c", "cpp", "c++"]),
    ("command", &["priority", "c", "cpp", "c++", "no_consume"]),
    ("query", &["priority", "c", "cpp", "c++"]),
    ("expression", &["priority", "c", "cpp", "c++"]),
];

/// Returns `true` if `action`'s language flags permit it to run for `language` (`"c"` or
/// `"cpp"`). An action with no language flags at all runs for every language.
pub fn language_allows(action: &ParsedAction, language: &str) -> bool {
    let has_c = action.flag("c");
    let has_cpp = action.flag("cpp") || action.flag("c++");
    if !has_c && !has_cpp {
        return true;
    }
    match language {
        "c" => has_c,
        "cpp" => has_cpp,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_match_with_oneof_flag() {
        let map = json!({"match:oneof": {"a": 1}}).as_object().unwrap().clone();
        let parsed = parse_actions(&map, DISCOVER_ACTIONS);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].action, "match");
        assert!(parsed[0].flag("oneof"));
    }

    #[test]
    fn unknown_action_is_discarded() {
        let map = json!({"bogus:oneof": {}}).as_object().unwrap().clone();
        let parsed = parse_actions(&map, DISCOVER_ACTIONS);
        assert!(parsed.is_empty());
    }

    #[test]
    fn illegal_flag_is_dropped() {
        let map = json!({"match:folder": {}}).as_object().unwrap().clone();
        let parsed = parse_actions(&map, DISCOVER_ACTIONS);
        assert!(!parsed[0].flag("folder"));
    }

    #[test]
    fn priority_flag_overrides_position() {
        let mut map = Map::new();
        map.insert("expression:priority=1#first by key order".into(), json!({}));
        map.insert("match".into(), json!({}));
        let parsed = parse_actions(&map, DISCOVER_ACTIONS);
        assert_eq!(parsed[0].action, "expression");
        assert_eq!(parsed[0].priority, 1);
    }

    #[test]
    fn default_priority_is_positional_and_stable() {
        let mut map = Map::new();
        map.insert("match#first".into(), json!({}));
        map.insert("expression#second".into(), json!({}));
        let parsed = parse_actions(&map, DISCOVER_ACTIONS);
        assert_eq!(parsed[0].action, "match");
        assert_eq!(parsed[1].action, "expression");
    }

    #[test]
    fn command_matched_by_full_prefix_query_by_quer() {
        let mut map = Map::new();
        map.insert("query:cpp".into(), json!({}));
        map.insert("command:no_consume".into(), json!({}));
        let parsed = parse_actions(&map, ANALYSIS_ACTIONS);
        let names: Vec<_> = parsed.iter().map(|a| a.action).collect();
        assert!(names.contains(&"query"));
        assert!(names.contains(&"command"));
    }
}
