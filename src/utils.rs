//! Small helpers shared across components: atomic file writes, path canonicalization, and
//! shell-like argv tokenization for rendered query commands.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Resolves `path` to its canonical, `\\?\`-free form (symlinks and `.`/`..` resolved, so two
/// paths to the same compiler binary always produce the same registry key), falling back to the
/// input path unchanged if it doesn't exist or can't be resolved.
pub fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Serializes `value` and writes it to `path` via a temp file + atomic rename, so a reader never
/// observes a partially-written cache file.
pub async fn atomic_write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("cache")
    ));
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads and parses a JSON file, treating a missing or corrupt file as simply absent rather than
/// an error (per the spec's "cache corruption is treated as absent").
pub async fn read_json_lenient(path: &Path) -> Option<serde_json::Value> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&text).ok()
}

/// Splits `command` the way a POSIX shell would split an unquoted/quoted argument list: words
/// separated by whitespace, single- and double-quoted spans preserved as one token.
pub fn split_argv(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        args.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// The platform path-list delimiter (`;` on Windows, `:` elsewhere), matching `std::env::split_paths`.
pub fn path_delimiter() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Deduplicates `items` preserving the order of first occurrence.
pub fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    use itertools::Itertools;
    items.into_iter().unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_argv_respects_quotes() {
        let args = split_argv(r#"cl.exe /I"C:\Program Files\inc" -DX=1"#);
        assert_eq!(args, vec!["cl.exe", "/IC:\\Program Files\\inc", "-DX=1"]);
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let items = vec!["/a".to_string(), "/b".to_string(), "/a".to_string()];
        assert_eq!(dedup_preserve_order(items), vec!["/a".to_string(), "/b".to_string()]);
    }
}
