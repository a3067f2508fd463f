//! End-to-end analysis: response-file inlining, `no_consume` argument preservation, an
//! expression-gated fragment, path-validation pruning of a nonexistent include, and
//! `parserArguments` post-processing — all from one compiler invocation.

use std::fs;

use serde_json::json;
use tokio::sync::Semaphore;
use toolset_intel::analysis::{get_intellisense_configuration, AnalysisOptions};
use toolset_intel::config::EngineConfig;
use toolset_intel::definition::DefinitionFile;
use toolset_intel::intellisense::IntellisenseConfiguration;
use toolset_intel::toolset::Toolset;

fn gcc_definition() -> DefinitionFile {
    let value = json!({
        "name": "gcc",
        "intellisense": { "parserArguments": [] },
        "analysis": {
            "task": ["inline-response-file"],
            "command:priority=0": {
                "^-DFOO=(?P<val>.+)$": { "macros": { "FOO": "${val}" } }
            },
            "command:no_consume:priority=1": {
                "^-I(?P<value>.+)$": { "include": { "paths": ["${value}"] } }
            },
            "expression:priority=2": {
                "language=='cpp'": { "forcedIncludeFiles": [] }
            }
        }
    });
    serde_json::from_value(value).unwrap()
}

fn toolset(dir: &std::path::Path) -> Toolset {
    let mut intellisense = IntellisenseConfiguration::new();
    intellisense.set("language", json!("cpp"));
    intellisense.set("version", json!("12.2.0"));
    intellisense.set("architecture", json!("x64"));
    intellisense.set("hostArchitecture", json!("x64"));
    intellisense.set("parserArguments", json!([]));
    Toolset::new(dir.join("gcc"), gcc_definition(), intellisense)
}

#[tokio::test]
async fn response_file_command_rewrite_and_path_pruning() {
    let dir = tempfile::tempdir().unwrap();
    let resp = dir.path().join("resp.txt");
    fs::write(&resp, "-Wall -Wextra").unwrap();

    let toolset = toolset(dir.path());
    let config = EngineConfig::default();
    let permits = Semaphore::new(2);

    let argv = vec![
        "-DFOO=1".to_string(),
        "-Ibad/nonexistent/path".to_string(),
        format!("@{}", resp.display()),
    ];

    let result = get_intellisense_configuration(&toolset, &argv, &AnalysisOptions::default(), &config, &permits)
        .await
        .unwrap();

    // -DFOO=1 was consumed by the plain `command` action and turned into a macro.
    assert_eq!(result.get_str("macros.FOO"), Some("1"));

    // The `-I` flag matched a `no_consume` command: its fragment merged (include.paths), but the
    // nonexistent path is pruned away by path validation.
    assert_eq!(result.string_list("include.paths"), Vec::<String>::new());

    // The expression-gated fragment always applies for a C++ toolset.
    assert!(result.get("forcedIncludeFiles").is_some());

    // parserArguments starts as [] (present), so post-processing appends the macro flag.
    let parser_args = result.parser_arguments();
    assert!(parser_args.contains(&"-DFOO=1".to_string()));
}

#[tokio::test]
async fn analysis_cache_returns_clone_without_resubmitting_user_override_globally() {
    let dir = tempfile::tempdir().unwrap();
    let toolset = toolset(dir.path());
    let config = EngineConfig::default();
    let permits = Semaphore::new(2);
    let argv = vec!["-DFOO=1".to_string()];

    let first = get_intellisense_configuration(&toolset, &argv, &AnalysisOptions::default(), &config, &permits)
        .await
        .unwrap();

    let mut options = AnalysisOptions::default();
    options.user_intellisense_configuration = Some(json!({"standard": "c++20"}));
    let second = get_intellisense_configuration(&toolset, &argv, &options, &config, &permits).await.unwrap();

    assert_eq!(second.get_str("standard"), Some("c++20"));
    // The cached entry itself (pre-override) is untouched by the second call's override.
    assert_ne!(first.get_str("standard"), Some("c++20"));
}
