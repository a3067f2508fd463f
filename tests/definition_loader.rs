//! Loads the JSON5 fixture under `fixtures/` and checks the shapes the rest of the engine relies
//! on (action blocks parse, comments/trailing commas are tolerated).

use std::path::PathBuf;

use toolset_intel::definition::load_definitions;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

#[tokio::test]
async fn loads_gcc_fixture_with_comments_and_trailing_commas() {
    let definitions = load_definitions(&[fixtures_dir()]).await;
    let gcc = definitions.iter().find(|d| d.name == "gcc").expect("gcc definition loaded");

    assert_eq!(gcc.discover_binary_names(), vec!["gcc".to_string(), "g++".to_string()]);
    assert_eq!(gcc.intellisense["standard"], "C++17");
    assert!(gcc.discover.contains_key("match:oneof"));
    assert!(gcc.analysis.contains_key("command"));
}

#[tokio::test]
async fn unknown_root_yields_no_definitions_not_an_error() {
    let definitions = load_definitions(&[PathBuf::from("/nonexistent/root/for/this/test")]).await;
    assert!(definitions.is_empty());
}
