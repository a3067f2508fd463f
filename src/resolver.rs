//! The concrete [`Resolver`] implementations used by discovery and analysis.

use std::collections::HashMap;
use std::path::{Path, MAIN_SEPARATOR};

use serde_json::Value;

use crate::definition::DefinitionFile;
use crate::render::{Resolved, Resolver};
use crate::utils::path_delimiter;

/// The resolver threaded through discovery and analysis. Consults, in order for an empty prefix:
/// capture groups from the action currently running, the working `intellisense` document, then
/// a small set of built-in names (`name`, `binary`/`compilerPath`, `pathSeparator`,
/// `pathDelimiter`, `workspaceFolder`/`cwd`). Prefixed tokens (`env:`, `definition:`, `config:`,
/// `host.*`, `compilerPath.basename`) are resolved independently of that context.
pub struct EngineResolver<'a> {
    pub compiler_path: &'a Path,
    pub definition: &'a DefinitionFile,
    pub intellisense: &'a Value,
    pub working_directory: Option<&'a Path>,
    pub captures: HashMap<String, String>,
}

impl<'a> EngineResolver<'a> {
    pub fn new(compiler_path: &'a Path, definition: &'a DefinitionFile, intellisense: &'a Value) -> Self {
        Self {
            compiler_path,
            definition,
            intellisense,
            working_directory: None,
            captures: HashMap::new(),
        }
    }

    pub fn with_captures(mut self, captures: HashMap<String, String>) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_working_directory(mut self, working_directory: Option<&'a Path>) -> Self {
        self.working_directory = working_directory;
        self
    }

    fn compiler_stem(&self) -> String {
        let name = self.compiler_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if cfg!(windows) {
            name.strip_suffix(".exe").unwrap_or(name).to_string()
        } else {
            name.to_string()
        }
    }
}

impl<'a> Resolver for EngineResolver<'a> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        match prefix {
            "env" => {
                if expression == "home" {
                    return dirs::home_dir().map(|p| Resolved::Scalar(p.display().to_string()));
                }
                std::env::var(expression).ok().map(Resolved::Scalar)
            }
            "definition" => {
                let as_value = serde_json::to_value(self.definition).ok()?;
                lookup_path(&as_value, expression).map(value_to_resolved)
            }
            "config" => Some(Resolved::Scalar(String::new())),
            "host" => match expression {
                "os" | "platform" => Some(Resolved::Scalar(host_platform().to_string())),
                "arch" => Some(Resolved::Scalar(std::env::consts::ARCH.to_string())),
                _ => None,
            },
            "compilerPath" if expression == "basename" => Some(Resolved::Scalar(self.compiler_stem())),
            "" => self.resolve_bare(expression),
            _ => None,
        }
    }
}

impl<'a> EngineResolver<'a> {
    fn resolve_bare(&self, expression: &str) -> Option<Resolved> {
        if let Some(value) = self.captures.get(expression) {
            return Some(Resolved::Scalar(value.clone()));
        }
        match expression {
            "pathSeparator" => return Some(Resolved::Scalar(MAIN_SEPARATOR.to_string())),
            "pathDelimiter" => return Some(Resolved::Scalar(path_delimiter().to_string())),
            "workspaceFolder" | "cwd" => {
                return self
                    .working_directory
                    .map(|p| Resolved::Scalar(p.display().to_string()));
            }
            "name" => return Some(Resolved::Scalar(self.definition.name.clone())),
            "binary" | "compilerPath" => {
                return Some(Resolved::Scalar(self.compiler_path.display().to_string()))
            }
            // The grammar's prefix class permits dots, so `host.os`/`compilerPath.basename` are
            // ambiguous between a colon-prefixed token and a bare dotted expression — both
            // `${host.os:...}` and `${host.os}` are accepted.
            "host.os" | "host.platform" => return Some(Resolved::Scalar(host_platform().to_string())),
            "host.arch" => return Some(Resolved::Scalar(std::env::consts::ARCH.to_string())),
            "compilerPath.basename" => return Some(Resolved::Scalar(self.compiler_stem())),
            _ => {}
        }
        lookup_path(self.intellisense, expression).map(value_to_resolved)
    }
}

fn host_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        "linux"
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn value_to_resolved(value: &Value) -> Resolved {
    match value {
        Value::String(s) => Resolved::Scalar(s.clone()),
        Value::Array(items) => {
            Resolved::List(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        }
        Value::Bool(b) => Resolved::Scalar(b.to_string()),
        Value::Number(n) => Resolved::Scalar(n.to_string()),
        Value::Null => Resolved::Scalar(String::new()),
        Value::Object(_) => Resolved::Scalar(value.to_string()),
    }
}

/// Wraps a base resolver and expands the reserved "rx resolver" tokens used inside `command`/
/// `query` regex templates before delegating anything else.
pub struct RxResolver<'a> {
    pub inner: &'a dyn Resolver,
}

impl<'a> Resolver for RxResolver<'a> {
    fn resolve(&self, prefix: &str, expression: &str) -> Option<Resolved> {
        if prefix.is_empty() {
            match expression {
                "-/" | "/-" => return Some(Resolved::Scalar(r"[\-\/]".to_string())),
                "key" => return Some(Resolved::Scalar(r"(?P<key>[^=]+)".to_string())),
                "value" => return Some(Resolved::Scalar(r"(?P<value>.+)".to_string())),
                "keyEqualsValue" => {
                    return Some(Resolved::Scalar(r"(?P<key>[^=]+)=(?P<value>.+)".to_string()))
                }
                _ => {}
            }
        }
        self.inner.resolve(prefix, expression)
    }
}
