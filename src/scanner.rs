//! Binary Scanner (C4): binary-safe grep over an executable's bytes.
//!
//! Implemented in-process with `regex::bytes` rather than shelling out to a text-search utility,
//! since the engine cannot assume one is installed on the host it's discovering compilers on.

use regex::bytes::{Regex, RegexBuilder};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Caps how many bytes a single scan will read before giving up, protecting against
/// pathologically large or non-terminating "binaries" (e.g. a symlink loop or a device file)
/// being handed to the scanner.
const MAX_SCANNED_BYTES: usize = 64 * 1024 * 1024;

/// A single match, with named capture groups decoded lossily (compiler binaries are not
/// guaranteed to contain valid UTF-8 outside the matched strings).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedMatch {
    pub text: String,
    pub captures: std::collections::HashMap<String, String>,
}

/// Compiles `pattern` case-insensitively and returns a lazy iterator over matches found in
/// `path`'s bytes, treating NUL bytes as record separators.
pub fn scan(path: &Path, pattern: &str) -> io::Result<BinaryMatches> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let file = File::open(path)?;
    Ok(BinaryMatches {
        reader: BufReader::new(file),
        regex,
        buffer: Vec::new(),
        eof: false,
        scanned: 0,
    })
}

/// Convenience: the first match, if any. Short-circuits the scan as soon as one is found.
pub fn first_match(path: &Path, pattern: &str) -> io::Result<Option<CapturedMatch>> {
    Ok(scan(path, pattern)?.next())
}

pub struct BinaryMatches {
    reader: BufReader<File>,
    regex: Regex,
    buffer: Vec<u8>,
    eof: bool,
    scanned: usize,
}

impl Iterator for BinaryMatches {
    type Item = CapturedMatch;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == 0) {
                let record: Vec<u8> = self.buffer.drain(..=pos).collect();
                let record = &record[..record.len() - 1];
                if let Some(m) = try_match(&self.regex, record) {
                    return Some(m);
                }
                continue;
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return None;
                }
                let record = std::mem::take(&mut self.buffer);
                return try_match(&self.regex, &record);
            }

            if self.scanned >= MAX_SCANNED_BYTES {
                self.eof = true;
                continue;
            }

            let mut chunk = [0u8; 16 * 1024];
            match self.reader.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    self.scanned += n;
                }
                Err(_) => self.eof = true,
            }
        }
    }
}

fn try_match(regex: &Regex, record: &[u8]) -> Option<CapturedMatch> {
    let caps = regex.captures(record)?;
    let text = String::from_utf8_lossy(&caps[0]).into_owned();
    let mut captures = std::collections::HashMap::new();
    for name in regex.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            captures.insert(name.to_string(), String::from_utf8_lossy(m.as_bytes()).into_owned());
        }
    }
    Some(CapturedMatch { text, captures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn finds_version_string_among_nul_separated_records() {
        let mut data = Vec::new();
        data.extend_from_slice(b"garbage\0");
        data.extend_from_slice(b"Microsoft (R) C/C++ Optimizing Compiler Version 19.36.32532 for x64\0");
        data.extend_from_slice(b"more garbage");
        let f = write_fixture(&data);

        let m = first_match(
            f.path(),
            r"Microsoft \(R\) C/C\+\+ Optimizing Compiler Version (?P<version>[\d.]+) for (?P<architecture>\w+)",
        )
        .unwrap()
        .expect("expected a match");

        assert_eq!(m.captures.get("version").unwrap(), "19.36.32532");
        assert_eq!(m.captures.get("architecture").unwrap(), "x64");
    }

    #[test]
    fn case_insensitive() {
        let f = write_fixture(b"\0GCC VERSION 12.2.0\0");
        let m = first_match(f.path(), r"gcc version (?P<v>[\d.]+)").unwrap().unwrap();
        assert_eq!(m.captures.get("v").unwrap(), "12.2.0");
    }

    #[test]
    fn no_match_returns_none() {
        let f = write_fixture(b"\0nothing here\0");
        assert!(first_match(f.path(), "clang version").unwrap().is_none());
    }
}
