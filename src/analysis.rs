//! Analysis Engine (C8): turns a compiler invocation into a resolved IntelliSense configuration.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{instrument, trace, warn};

use crate::actions::{language_allows, parse_actions, ParsedAction, ANALYSIS_ACTIONS};
use crate::config::EngineConfig;
use crate::definition::DefinitionFile;
use crate::error::Result;
use crate::intellisense::IntellisenseConfiguration;
use crate::merge::merge;
use crate::render::{evaluate_expression, recursive_render, render, Resolved, Resolver};
use crate::resolver::{EngineResolver, RxResolver};
use crate::toolset::{argv_cache_key, Toolset};
use crate::utils::{dedup_preserve_order, path_delimiter, split_argv};

/// Per-call options accepted alongside the compiler invocation's argv.
#[derive(Clone, Debug, Default)]
pub struct AnalysisOptions {
    pub base_directory: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
    pub language: Option<String>,
    pub standard: Option<String>,
    pub user_intellisense_configuration: Option<Value>,
}

/// A resolver is only as useful as the captures it carries; this narrows scalar/list values the
/// same way [`crate::render::Resolved`] does, for contexts (regex-chain captures, query matches)
/// that aren't the scanner's always-scalar output.
struct CapturesResolver<'a> {
    captures: HashMap<String, Resolved>,
    fallback: &'a dyn Resolver,
}

impl<'a> Resolver for CapturesResolver<'a> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix.is_empty() {
            if let Some(v) = self.captures.get(expression) {
                return Some(v.clone());
            }
        }
        self.fallback.resolve(prefix, expression)
    }
}

#[instrument(skip_all, fields(toolset = %toolset.name()))]
pub async fn get_intellisense_configuration(
    toolset: &Toolset,
    compiler_args: &[String],
    options: &AnalysisOptions,
    config: &EngineConfig,
    subprocess_permits: &Semaphore,
) -> Result<IntellisenseConfiguration> {
    let key = argv_cache_key(compiler_args);

    let base_dir = options.base_directory.as_deref();

    if let Some(cached) = toolset.analysis_cache.lock().unwrap().get(&key).cloned() {
        return apply_user_override(cached, toolset, options, base_dir);
    }

    let language =
        options.language.clone().unwrap_or_else(|| toolset.intellisense.language().unwrap_or("cpp").to_string());
    let standard = options.standard.clone().or_else(|| toolset.intellisense.standard().map(str::to_string));

    let mut working = toolset.intellisense.0.clone();
    merge(
        &mut working,
        &serde_json::json!({
            "language": language,
            "standard": standard,
            "compilerPath": toolset.compiler_path.display().to_string(),
        }),
    );

    let mut argv: Vec<String> = compiler_args.to_vec();
    let actions = parse_actions(&toolset.definition.analysis, ANALYSIS_ACTIONS);

    for action in &actions {
        if !language_allows(action, &language) {
            continue;
        }
        match action.action {
            "task" => run_task(action, &mut argv),
            "command" => run_command(action, toolset, &mut argv, &mut working, base_dir),
            "query" => run_query(action, toolset, &mut working, config, subprocess_permits, base_dir).await,
            "expression" => run_expression(action, toolset, &mut working, base_dir),
            _ => {}
        }
    }

    let base_resolver =
        EngineResolver::new(&toolset.compiler_path, &toolset.definition, &working).with_working_directory(base_dir);
    validate_paths(&mut working, &base_resolver);

    let final_resolver =
        EngineResolver::new(&toolset.compiler_path, &toolset.definition, &working).with_working_directory(base_dir);
    working = recursive_render(&working, &final_resolver);

    let resolved = IntellisenseConfiguration(working);
    toolset.analysis_cache.lock().unwrap().insert(key, resolved.clone());

    apply_user_override(resolved, toolset, options, base_dir)
}

fn apply_user_override(
    cached: IntellisenseConfiguration,
    toolset: &Toolset,
    options: &AnalysisOptions,
    base_dir: Option<&Path>,
) -> Result<IntellisenseConfiguration> {
    let mut result = cached.0.clone();
    if let Some(overrides) = &options.user_intellisense_configuration {
        merge(&mut result, overrides);
    }
    let resolver = EngineResolver::new(&toolset.compiler_path, &toolset.definition, &result)
        .with_working_directory(base_dir);
    validate_paths(&mut result, &resolver);
    post_process(&mut result);
    Ok(IntellisenseConfiguration(result))
}

fn task_names(block: &Value) -> Vec<String> {
    match block {
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn run_task(action: &ParsedAction, argv: &mut Vec<String>) {
    for name in task_names(&action.block) {
        match name.as_str() {
            "inline-environment-variables" => {
                if let Ok(cl) = std::env::var("CL") {
                    argv.extend(split_argv(&cl));
                }
                if let Ok(cl_) = std::env::var("_CL_") {
                    let mut prefix = split_argv(&cl_);
                    prefix.extend(std::mem::take(argv));
                    *argv = prefix;
                }
            }
            "inline-response-file" => {
                let mut expanded = Vec::with_capacity(argv.len());
                for arg in argv.drain(..) {
                    if let Some(path) = arg.strip_prefix('@') {
                        match std::fs::read_to_string(path) {
                            Ok(contents) => expanded.extend(split_argv(&contents)),
                            Err(_) => expanded.push(arg),
                        }
                    } else {
                        expanded.push(arg);
                    }
                }
                *argv = expanded;
            }
            "remove-linker-arguments" => {
                if let Some(idx) = argv
                    .iter()
                    .position(|a| a.eq_ignore_ascii_case("-link") || a.eq_ignore_ascii_case("/link"))
                {
                    argv.truncate(idx);
                }
            }
            // Reserved no-ops: named for definitions that may reference them, nothing to do yet.
            "consume-lib-path" | "zw-command-line-switch" | "experimental-module-negative" | "verify-includes" => {}
            other => trace!(task = other, "unknown analysis task, ignoring"),
        }
    }
}

fn run_command(
    action: &ParsedAction,
    toolset: &Toolset,
    argv: &mut Vec<String>,
    working: &mut Value,
    base_dir: Option<&Path>,
) {
    let Value::Object(chains) = &action.block else {
        return;
    };
    let no_consume = action.flag("no_consume");
    let base_resolver =
        EngineResolver::new(&toolset.compiler_path, &toolset.definition, working).with_working_directory(base_dir);
    let rx_resolver = RxResolver { inner: &base_resolver };

    let compiled: Vec<(Vec<Regex>, &Value)> = chains
        .iter()
        .filter_map(|(chain_str, fragment)| {
            let regexes: Vec<Regex> = chain_str
                .split(';')
                .filter_map(|part| Regex::new(&render(part, &rx_resolver)).ok())
                .collect();
            if regexes.is_empty() {
                None
            } else {
                Some((regexes, fragment))
            }
        })
        .collect();

    let mut remaining: VecDeque<String> = argv.drain(..).collect();
    let mut kept = Vec::new();

    'outer: while !remaining.is_empty() {
        for (regexes, fragment) in &compiled {
            if regexes.len() > remaining.len() {
                continue;
            }
            let mut captures: HashMap<String, Resolved> = HashMap::new();
            let matched = regexes.iter().enumerate().all(|(i, re)| match re.captures(&remaining[i]) {
                Some(caps) => {
                    collect_named_captures(re, &caps, &mut captures);
                    true
                }
                None => false,
            });
            if matched {
                let resolver = EngineResolver::new(&toolset.compiler_path, &toolset.definition, working)
                    .with_working_directory(base_dir);
                let capture_resolver = CapturesResolver { captures, fallback: &resolver };
                let rendered_fragment = recursive_render(fragment, &capture_resolver);
                merge(working, &rendered_fragment);

                let consumed: Vec<String> = (0..regexes.len()).filter_map(|_| remaining.pop_front()).collect();
                if no_consume {
                    kept.extend(consumed);
                }
                continue 'outer;
            }
        }
        if let Some(front) = remaining.pop_front() {
            kept.push(front);
        }
    }
    *argv = kept;
}

fn collect_named_captures(re: &Regex, caps: &regex::Captures<'_>, out: &mut HashMap<String, Resolved>) {
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            out.insert(name.to_string(), Resolved::Scalar(m.as_str().to_string()));
        }
    }
}

async fn run_query(
    action: &ParsedAction,
    toolset: &Toolset,
    working: &mut Value,
    _config: &EngineConfig,
    subprocess_permits: &Semaphore,
    base_dir: Option<&Path>,
) {
    let Value::Object(commands) = &action.block else {
        return;
    };

    for (template, regex_map) in commands {
        let Value::Object(regex_map) = regex_map else {
            continue;
        };

        let scratch = tempfile::tempdir().ok();
        let stdout_path = scratch.as_ref().map(|d| d.path().join("stdout"));
        let stderr_path = scratch.as_ref().map(|d| d.path().join("stderr"));
        if let Some(p) = &stdout_path {
            let _ = std::fs::write(p, b"");
        }
        if let Some(p) = &stderr_path {
            let _ = std::fs::write(p, b"");
        }

        let base_resolver =
            EngineResolver::new(&toolset.compiler_path, &toolset.definition, working).with_working_directory(base_dir);
        let tmp_resolver = TmpResolver { inner: &base_resolver, stdout: &stdout_path, stderr: &stderr_path };
        let rx_resolver = RxResolver { inner: &tmp_resolver };
        let rendered_cmd = render(template, &rx_resolver);

        let captured = {
            let cached = toolset.query_cache.lock().unwrap().get(&rendered_cmd).cloned();
            match cached {
                Some(text) => text,
                None => {
                    let text = run_subprocess(toolset, &rendered_cmd, &stdout_path, &stderr_path, subprocess_permits)
                        .await;
                    toolset.query_cache.lock().unwrap().insert(rendered_cmd.clone(), text.clone());
                    text
                }
            }
        };

        for (pattern, fragment) in regex_map {
            // The spec's "gm" match semantics (global + multiline `^`/`$`) for query regexes.
            let Ok(re) = regex::RegexBuilder::new(pattern).multi_line(true).build() else { continue };
            for caps in re.captures_iter(&captured) {
                let mut captures: HashMap<String, Resolved> = HashMap::new();
                for name in re.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        let text = m.as_str();
                        if text.contains('\n') {
                            let list: Vec<String> =
                                text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
                            captures.insert(name.to_string(), Resolved::List(list));
                        } else {
                            captures.insert(name.to_string(), Resolved::Scalar(text.to_string()));
                        }
                    }
                }
                let base_resolver = EngineResolver::new(&toolset.compiler_path, &toolset.definition, working)
                    .with_working_directory(base_dir);
                let capture_resolver = CapturesResolver { captures, fallback: &base_resolver };
                let rendered_fragment = recursive_render(fragment, &capture_resolver);
                merge(working, &rendered_fragment);
            }
        }
    }
}

struct TmpResolver<'a> {
    inner: &'a dyn Resolver,
    stdout: &'a Option<PathBuf>,
    stderr: &'a Option<PathBuf>,
}

impl<'a> Resolver for TmpResolver<'a> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix == "tmp" {
            let path = match expression {
                "stdout" => self.stdout.as_ref(),
                "stderr" => self.stderr.as_ref(),
                _ => None,
            };
            return path.map(|p| Resolved::Scalar(p.display().to_string()));
        }
        self.inner.resolve(prefix, expression)
    }
}

async fn run_subprocess(
    toolset: &Toolset,
    rendered_cmd: &str,
    stdout_path: &Option<PathBuf>,
    stderr_path: &Option<PathBuf>,
    subprocess_permits: &Semaphore,
) -> String {
    let argv = split_argv(rendered_cmd);
    let Some((program, rest)) = argv.split_first() else {
        return String::new();
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(rest);
    // If this future is dropped mid-query (caller cancellation), kill the child instead of
    // leaking a running compiler process.
    cmd.kill_on_drop(true);
    if let Some(dir) = toolset.compiler_path.parent() {
        let existing = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![dir.to_path_buf()];
        paths.extend(std::env::split_paths(&existing));
        if let Ok(joined) = std::env::join_paths(paths) {
            cmd.env("PATH", joined);
        }
    }

    let Ok(_permit) = subprocess_permits.acquire().await else {
        return String::new();
    };

    let mut combined = match cmd.output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push('\n');
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            text
        }
        Err(err) => {
            warn!(%err, toolset = %toolset.name(), "query subprocess failed, continuing with no output");
            String::new()
        }
    };

    for path in [stdout_path, stderr_path].into_iter().flatten() {
        if let Ok(extra) = tokio::fs::read_to_string(path).await {
            if !extra.is_empty() {
                combined.push('\n');
                combined.push_str(&extra);
            }
        }
    }
    combined
}

fn run_expression(action: &ParsedAction, toolset: &Toolset, working: &mut Value, base_dir: Option<&Path>) {
    let Value::Object(entries) = &action.block else {
        return;
    };
    for (expr, fragment) in entries {
        let resolver = EngineResolver::new(&toolset.compiler_path, &toolset.definition, working)
            .with_working_directory(base_dir);
        let snapshot = working.clone();
        if evaluate_expression(expr, &snapshot, &resolver) {
            merge(working, fragment);
        }
    }
}

const PATH_LIST_SUFFIXES: &[&str] = &["paths", "files"];
const PATH_SCALAR_SUFFIXES: &[&str] = &["path", "file"];

fn validate_paths(value: &mut Value, resolver: &dyn Resolver) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, v) in map.iter_mut() {
        let lower = key.to_lowercase();
        if v.is_object() {
            validate_paths(v, resolver);
        } else if PATH_LIST_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            *v = Value::Array(resolve_path_list(v, resolver).into_iter().map(Value::String).collect());
        } else if PATH_SCALAR_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            if let Some(s) = v.as_str() {
                *v = Value::String(render(s, resolver));
            }
        }
    }
}

fn resolve_path_list(value: &Value, resolver: &dyn Resolver) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Value::String(s) => s.split(path_delimiter()).map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let rendered: Vec<String> = raw.into_iter().map(|p| render(&p, resolver)).collect();
    let existing: Vec<String> = rendered.into_iter().filter(|p| Path::new(p).exists()).collect();
    dedup_preserve_order(existing)
}

fn post_process(value: &mut Value) {
    let Some(Value::Array(_)) = value.get("parserArguments") else {
        return;
    };
    let mut args: Vec<String> =
        value["parserArguments"].as_array().unwrap().iter().filter_map(|v| v.as_str().map(str::to_string)).collect();

    if let Some(Value::Object(macros)) = value.get("macros") {
        for (name, val) in macros {
            let val = val.as_str().unwrap_or_default();
            args.push(format!("-D{name}={val}"));
        }
    }
    append_paths(value, "include.builtInPaths", &mut args, "-I", false);
    append_paths(value, "include.systemPaths", &mut args, "--sys_include", true);
    append_paths(value, "include.externalPaths", &mut args, "--sys_include", true);
    append_paths(value, "include.paths", &mut args, "--include_directory", true);
    append_paths(value, "include.environmentPaths", &mut args, "--include_directory", true);

    value["parserArguments"] = Value::Array(args.into_iter().map(Value::String).collect());
}

fn append_paths(value: &Value, path: &str, args: &mut Vec<String>, flag: &str, separate_token: bool) {
    let mut parts = path.split('.');
    let mut cur = value;
    for part in &mut parts {
        match cur.get(part) {
            Some(next) => cur = next,
            None => return,
        }
    }
    let Value::Array(items) = cur else { return };
    for item in items {
        if let Some(s) = item.as_str() {
            if separate_token {
                args.push(flag.to_string());
                args.push(s.to_string());
            } else {
                args.push(format!("{flag}{s}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn toolset_with_analysis(analysis: Value) -> Toolset {
        let mut def_value = json!({"name": "gcc"});
        def_value["analysis"] = analysis;
        let def: DefinitionFile = serde_json::from_value(def_value).unwrap();
        let mut intellisense = IntellisenseConfiguration::new();
        intellisense.set("language", json!("cpp"));
        intellisense.set("version", json!("12.2.0"));
        Toolset::new(PathBuf::from("/usr/bin/gcc"), def, intellisense)
    }

    #[test]
    fn remove_linker_arguments_truncates_at_link() {
        let action = ParsedAction {
            action: "task",
            key: "task".into(),
            block: json!(["remove-linker-arguments"]),
            flags: Default::default(),
            priority: 0,
        };
        let mut argv = vec!["-c".to_string(), "a.cpp".to_string(), "-link".to_string(), "ignored".to_string()];
        run_task(&action, &mut argv);
        assert_eq!(argv, vec!["-c".to_string(), "a.cpp".to_string()]);
    }

    #[test]
    fn toolset_with_analysis_seeds_expected_fields() {
        let toolset = toolset_with_analysis(json!({}));
        assert_eq!(toolset.intellisense.language(), Some("cpp"));
    }

    #[test]
    fn post_process_appends_macro_and_include_flags() {
        let mut cfg = json!({
            "parserArguments": [],
            "macros": {"X": "1"},
            "include": {"paths": ["/inc"], "systemPaths": ["/sys"]}
        });
        post_process(&mut cfg);
        let args: Vec<&str> = cfg["parserArguments"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert!(args.contains(&"-DX=1"));
        assert!(args.contains(&"--sys_include"));
        assert!(args.contains(&"--include_directory"));
    }

    #[test]
    fn post_process_skips_when_parser_arguments_missing() {
        let mut cfg = json!({"macros": {"X": "1"}});
        post_process(&mut cfg);
        assert!(cfg.get("parserArguments").is_none());
    }
}
