//! An identified compiler: the definition that matched it, plus its per-invocation caches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::definition::DefinitionFile;
use crate::intellisense::IntellisenseConfiguration;

/// A compiler that discovery has verified against some [`DefinitionFile`].
///
/// `compiler_path` and `definition` are fixed at construction; the caches are the only interior
/// mutability, guarded independently so concurrent analyses of different argv never contend.
pub struct Toolset {
    pub compiler_path: PathBuf,
    pub definition: DefinitionFile,
    /// Field values discovery resolved onto the toolset (`version`, `architecture`, ...), merged
    /// into every analysis as the seed configuration.
    pub intellisense: IntellisenseConfiguration,
    /// `command` string -> captured combined stdout+stderr, keyed by the exact rendered command.
    pub query_cache: Mutex<HashMap<String, String>>,
    /// argv key -> resolved configuration, before any per-call user override is applied.
    pub analysis_cache: Mutex<HashMap<String, IntellisenseConfiguration>>,
    name: String,
}

impl Toolset {
    pub fn new(compiler_path: PathBuf, definition: DefinitionFile, intellisense: IntellisenseConfiguration) -> Self {
        Self::with_caches(compiler_path, definition, intellisense, HashMap::new(), HashMap::new())
    }

    /// Reconstructs a toolset together with previously persisted `query_cache`/`analysis_cache`
    /// contents, used when rehydrating the on-disk snapshot (`Registry::load_cached_entries`).
    pub fn with_caches(
        compiler_path: PathBuf,
        definition: DefinitionFile,
        intellisense: IntellisenseConfiguration,
        query_cache: HashMap<String, String>,
        analysis_cache: HashMap<String, IntellisenseConfiguration>,
    ) -> Self {
        let name = derive_name(&definition, &intellisense);
        Self {
            compiler_path,
            definition,
            intellisense,
            query_cache: Mutex::new(query_cache),
            analysis_cache: Mutex::new(analysis_cache),
            name,
        }
    }

    /// Stable identity: `"<definition.name>/<version>/<architecture>/<hostArchitecture>"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<semver::Version> {
        self.intellisense.get_str("version").and_then(|v| semver::Version::parse(v).ok())
    }
}

fn derive_name(definition: &DefinitionFile, intellisense: &IntellisenseConfiguration) -> String {
    let field = |key: &str| intellisense.get_str(key).unwrap_or("unknown").to_string();
    format!(
        "{}/{}/{}/{}",
        definition.name,
        field("version"),
        field("architecture"),
        field("hostArchitecture"),
    )
}

/// Computes the cache key used for `analysis_cache`: the argv joined with a separator that
/// cannot appear inside a single shell-tokenized argument.
pub fn argv_cache_key(compiler_args: &[String]) -> String {
    compiler_args.join("\u{1}")
}

/// Matches a glob-style pattern (`*` only) against a toolset name.
pub fn name_matches_pattern(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !name.starts_with(first) {
        return false;
    }
    let mut rest = &name[first.len()..];
    let mut segments: Vec<&str> = segments.collect();
    let last = segments.pop();
    for seg in &segments {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(idx) => rest = &rest[idx + seg.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) if !last.is_empty() => rest.ends_with(last),
        _ => true,
    }
}

/// Candidate comparison for `identify_toolset`: descending by semver version, falling back to
/// name comparison (stable, so equal-rank entries keep registry/insertion order).
pub fn compare_for_identify(a: &Toolset, b: &Toolset) -> std::cmp::Ordering {
    match (a.version(), b.version()) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_pattern_matches_prefix_and_suffix() {
        assert!(name_matches_pattern("gcc/12.2.0/x64/x64", "gcc/*"));
        assert!(name_matches_pattern("gcc/12.2.0/x64/x64", "*/x64"));
        assert!(!name_matches_pattern("clang/15/x64/x64", "gcc/*"));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        assert!(name_matches_pattern("gcc/12.2.0/x64/x64", "gcc/12.2.0/x64/x64"));
        assert!(!name_matches_pattern("gcc/12.2.0/x64/x64", "gcc/12.2.0"));
    }

    #[test]
    fn newer_version_sorts_first() {
        let def = |v: &str| -> DefinitionFile {
            let mut d: DefinitionFile = serde_json::from_value(serde_json::json!({"name": "gcc"})).unwrap();
            d.version = Some(v.to_string());
            d
        };
        let icfg = |v: &str| {
            let mut c = IntellisenseConfiguration::new();
            c.set("version", serde_json::json!(v));
            c
        };
        let a = Toolset::new(PathBuf::from("/a"), def("12.2.0"), icfg("12.2.0"));
        let b = Toolset::new(PathBuf::from("/b"), def("9.4.0"), icfg("9.4.0"));
        assert_eq!(compare_for_identify(&a, &b), std::cmp::Ordering::Less);
    }
}
