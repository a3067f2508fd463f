//! End-to-end discovery: a fake compiler binary on disk, a definition naming it, and the
//! `match:oneof` action extracting its version — the MSVC-style binary-scan scenario, but with a
//! fake binary instead of a real MSVC install so the test is hermetic.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde_json::json;
use toolset_intel::config::EngineConfig;
use toolset_intel::definition::DefinitionFile;
use toolset_intel::discovery::search_for_toolsets;

fn write_fake_compiler(path: &std::path::Path, banner: &[u8]) {
    fs::write(path, banner).unwrap();
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn discovers_candidate_and_extracts_version_via_match_oneof() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = dir.path().join("fakecc");
    write_fake_compiler(
        &compiler,
        b"\0garbage\0Microsoft (R) C/C++ Optimizing Compiler Version 19.36.32532 for x64\0more\0",
    );

    let def_json = json!({
        "name": "msvc",
        "intellisense": { "language": "cpp" },
        "discover": {
            "binary": ["fakecc"],
            "locations": [dir.path().display().to_string()],
            "match:oneof": {
                r"Microsoft \(R\) C/C\+\+ Optimizing Compiler Version (?P<version>[\d.]+) for (?P<architecture>\w+)":
                    { "version": "${version}", "architecture": "${architecture}" }
            }
        }
    });
    let definition: DefinitionFile = serde_json::from_value(def_json).unwrap();
    let config = EngineConfig::default();

    let toolsets = search_for_toolsets(&definition, &config).await;
    assert_eq!(toolsets.len(), 1);
    assert_eq!(toolsets[0].intellisense.get_str("version"), Some("19.36.32532"));
    assert_eq!(toolsets[0].intellisense.get_str("architecture"), Some("x64"));
    assert_eq!(toolsets[0].compiler_path, compiler);
}

#[tokio::test]
async fn env_token_in_locations_entry_resolves_to_the_search_root() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = dir.path().join("fakecc");
    write_fake_compiler(&compiler, b"\0gcc version 12.2.0\0");

    std::env::set_var("TOOLSET_INTEL_DISCOVERY_TEST_ROOT", dir.path());

    let def_json = json!({
        "name": "gcc",
        "discover": {
            "binary": ["fakecc"],
            "locations": ["${env:TOOLSET_INTEL_DISCOVERY_TEST_ROOT}"],
            "match": {
                "gcc version (?P<version>[\\d.]+)": { "version": "${version}" }
            }
        }
    });
    let definition: DefinitionFile = serde_json::from_value(def_json).unwrap();
    let config = EngineConfig::default();

    let toolsets = search_for_toolsets(&definition, &config).await;
    std::env::remove_var("TOOLSET_INTEL_DISCOVERY_TEST_ROOT");

    // If the `${env:...}` token rendered to an empty string, the finder would have scanned the
    // process's own working directory instead of `dir` and never turned up `fakecc`.
    assert_eq!(toolsets.len(), 1);
    assert_eq!(toolsets[0].compiler_path, compiler);
}

#[tokio::test]
async fn candidate_missing_required_match_is_not_discovered() {
    let dir = tempfile::tempdir().unwrap();
    let compiler = dir.path().join("fakecc");
    write_fake_compiler(&compiler, b"\0nothing relevant here\0");

    let def_json = json!({
        "name": "msvc",
        "discover": {
            "binary": ["fakecc"],
            "locations": [dir.path().display().to_string()],
            "match": {
                r"Microsoft \(R\) C/C\+\+ Optimizing Compiler Version (?P<version>[\d.]+)":
                    { "version": "${version}" }
            }
        }
    });
    let definition: DefinitionFile = serde_json::from_value(def_json).unwrap();
    let config = EngineConfig::default();

    let toolsets = search_for_toolsets(&definition, &config).await;
    assert!(toolsets.is_empty());
}
