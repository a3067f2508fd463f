//! Discovery Engine (C7): turns a definition's `discover` block into zero or more [`Toolset`]s.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{instrument, trace};

use crate::actions::{parse_actions, ParsedAction, DISCOVER_ACTIONS};
use crate::config::EngineConfig;
use crate::definition::DefinitionFile;
use crate::finder::{Finder, FinderOptions};
use crate::intellisense::IntellisenseConfiguration;
use crate::render::render;
use crate::resolver::EngineResolver;
use crate::scanner;
use crate::toolset::Toolset;

#[cfg(windows)]
const EXECUTABLE_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat"];
#[cfg(not(windows))]
const EXECUTABLE_EXTENSIONS: &[&str] = &[];

/// Runs discovery for one definition: enumerates candidates, verifies each against the
/// `discover` block, and returns every candidate that passed as a freshly constructed [`Toolset`].
#[instrument(skip(definition, config), fields(definition = %definition.name))]
pub async fn search_for_toolsets(definition: &DefinitionFile, config: &EngineConfig) -> Vec<Toolset> {
    let names = definition.discover_binary_names();
    if names.is_empty() {
        return Vec::new();
    }

    let options = FinderOptions {
        executable: true,
        executable_extensions: EXECUTABLE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
    };
    let (finder, stream) = Finder::new(names, options, config.max_concurrent_directory_reads);

    for dir in std::env::split_paths(&std::env::var_os("PATH").unwrap_or_default()) {
        finder.scan(0, dir);
    }

    // No candidate binary is known yet, so `${compilerPath...}`/capture tokens can't resolve, but
    // `${env:...}`/`${host...}`/`${definition:...}` — the tokens a `locations` entry actually
    // uses to anchor a search root — do, the same way `run_expression` below resolves them.
    let locations_resolver = EngineResolver::new(Path::new(""), definition, &definition.intellisense);
    if let Some(Value::Array(locations)) = definition.discover.get("locations") {
        for loc in locations {
            if let Some(template) = loc.as_str() {
                let rendered = render(template, &locations_resolver);
                finder.scan(10, PathBuf::from(rendered));
            }
        }
    }
    for root in platform_roots() {
        finder.scan(10, root);
    }
    drop(finder);

    let candidates = stream.collect().await;
    let actions = parse_actions(&definition.discover, DISCOVER_ACTIONS);

    let mut toolsets = Vec::new();
    for candidate in candidates {
        match verify_candidate(&candidate, definition, &actions).await {
            Some(intellisense) => toolsets.push(Toolset::new(candidate, definition.clone(), intellisense)),
            None => trace!(path = %candidate.display(), "candidate failed discovery"),
        }
    }
    toolsets
}

#[cfg(target_os = "windows")]
fn platform_roots() -> Vec<PathBuf> {
    ["ProgramFiles", "ProgramW6432", "ProgramFiles(x86)", "ProgramFiles(Arm)"]
        .iter()
        .filter_map(|var| std::env::var_os(var).map(PathBuf::from))
        .collect()
}

#[cfg(target_os = "linux")]
fn platform_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/lib/")]
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
fn platform_roots() -> Vec<PathBuf> {
    Vec::new()
}

/// Verifies a single candidate against one definition directly, without enumerating a search —
/// used by `identify_toolset` when the caller already names an executable path.
pub async fn verify(candidate: &Path, definition: &DefinitionFile) -> Option<IntellisenseConfiguration> {
    let actions = parse_actions(&definition.discover, DISCOVER_ACTIONS);
    verify_candidate(candidate, definition, &actions).await
}

async fn verify_candidate(
    candidate: &Path,
    definition: &DefinitionFile,
    actions: &[ParsedAction],
) -> Option<IntellisenseConfiguration> {
    let mut intellisense = IntellisenseConfiguration(definition.intellisense.clone());
    intellisense.set("compilerPath", Value::String(candidate.display().to_string()));

    for action in actions {
        let passed = match action.action {
            "match" => run_match(candidate, definition, action, &mut intellisense),
            "expression" => run_expression(definition, action, &mut intellisense),
            _ => true,
        };
        if !passed {
            return None;
        }
    }
    Some(intellisense)
}

fn run_match(
    candidate: &Path,
    definition: &DefinitionFile,
    action: &ParsedAction,
    intellisense: &mut IntellisenseConfiguration,
) -> bool {
    let Value::Object(entries) = &action.block else {
        return true;
    };
    let oneof = action.flag("oneof");
    let optional = action.flag("optional");
    let mut any_matched = false;

    for (pattern, fragment) in entries {
        let base_resolver = EngineResolver::new(candidate, definition, &intellisense.0);
        let rendered_pattern = render(pattern, &base_resolver);
        let found = match scanner::first_match(candidate, &rendered_pattern) {
            Ok(found) => found,
            Err(_) => None,
        };
        match found {
            Some(m) => {
                any_matched = true;
                let resolver = EngineResolver::new(candidate, definition, &intellisense.0)
                    .with_captures(m.captures.clone());
                let rendered_fragment = crate::render::recursive_render(fragment, &resolver);
                intellisense.merge_fragment(&rendered_fragment);
                if oneof {
                    return true;
                }
            }
            None if optional => continue,
            None if oneof => continue,
            None => return false,
        }
    }
    if oneof {
        return any_matched;
    }
    true
}

fn run_expression(
    definition: &DefinitionFile,
    action: &ParsedAction,
    intellisense: &mut IntellisenseConfiguration,
) -> bool {
    let Value::Object(entries) = &action.block else {
        return true;
    };
    let oneof = action.flag("oneof");
    let optional = action.flag("optional");
    let folder = action.flag("folder");
    let file = action.flag("file");
    let mut any_matched = false;

    for (expr, fragment) in entries {
        let resolver = EngineResolver::new(Path::new(""), definition, &intellisense.0);
        let rendered = render(expr, &resolver);
        let path_ok = if folder {
            Path::new(&rendered).is_dir()
        } else if file {
            Path::new(&rendered).is_file()
        } else {
            true
        };
        let truthy = !rendered.is_empty() && path_ok;

        if truthy {
            any_matched = true;
            intellisense.merge_fragment(fragment);
            if oneof {
                return true;
            }
        } else if optional || oneof {
            continue;
        } else {
            return false;
        }
    }
    if oneof {
        return any_matched;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn definition(discover: Value) -> DefinitionFile {
        let mut value = json!({"name": "gcc"});
        value["discover"] = discover;
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn verify_candidate_matches_version_and_merges_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcc");
        fs::write(&path, b"\0gcc version 12.2.0 (Debian)\0").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let def = definition(json!({
            "binary": ["gcc"],
            "match": {
                "gcc version (?P<version>[\\d.]+)": { "version": "${version}" }
            }
        }));
        let actions = parse_actions(&def.discover, DISCOVER_ACTIONS);
        let result = verify_candidate(&path, &def, &actions).await.unwrap();
        assert_eq!(result.get_str("version"), Some("12.2.0"));
    }

    #[tokio::test]
    async fn verify_candidate_fails_when_required_match_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcc");
        fs::write(&path, b"\0nothing interesting\0").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let def = definition(json!({
            "binary": ["gcc"],
            "match": {
                "gcc version (?P<version>[\\d.]+)": { "version": "${version}" }
            }
        }));
        let actions = parse_actions(&def.discover, DISCOVER_ACTIONS);
        assert!(verify_candidate(&path, &def, &actions).await.is_none());
    }
}
