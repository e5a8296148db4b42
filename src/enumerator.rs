//! Pattern/file enumerator (§4.5): expands user-supplied glob patterns —
//! with brace expansion, `~` expansion, and optional case-insensitive
//! matching — into a deduplicated, ordered list of regular files.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PsarcError, Result};

bitflags::bitflags! {
    pub struct EnumFlags: u32 {
        const NONE             = 0;
        const RECURSIVE        = 0b01;
        const CASE_INSENSITIVE = 0b10;
    }
}

/// Accumulates the deduplicated, ordered file list a create operation will
/// archive. Patterns are resolved against an explicit base directory rather
/// than the process's current directory, so enumeration stays safe to call
/// from any thread and to unit-test without serialising on global state.
pub struct Enumerator {
    base_dir: PathBuf,
    seen_canonical: HashSet<PathBuf>,
    paths: Vec<String>,
}

impl Enumerator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Enumerator {
            base_dir: base_dir.into(),
            seen_canonical: HashSet::new(),
            paths: Vec::new(),
        }
    }

    /// Expands one user-supplied pattern and folds every matched regular
    /// file into the enumerator's path list.
    pub fn add_pattern(&mut self, pattern: &str, flags: EnumFlags) -> Result<()> {
        for brace_variant in expand_braces(pattern) {
            let tilde_expanded = expand_tilde(&brace_variant);
            let escapes = !Path::new(&tilde_expanded).is_absolute() && tilde_expanded.starts_with("../");

            let search_pattern = if flags.contains(EnumFlags::CASE_INSENSITIVE) {
                case_insensitive_class(&tilde_expanded)
            } else {
                tilde_expanded.clone()
            };

            self.walk_pattern(&search_pattern, escapes, flags)?;
        }
        Ok(())
    }

    fn walk_pattern(&mut self, pattern: &str, escapes: bool, flags: EnumFlags) -> Result<()> {
        let candidate = Path::new(pattern);
        let full_pattern = if candidate.is_absolute() {
            pattern.to_string()
        } else {
            self.base_dir.join(pattern).to_string_lossy().into_owned()
        };

        let paths = glob::glob(&full_pattern)
            .map_err(|e| PsarcError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let mut matched_any = false;
        for entry in paths {
            let path = entry.map_err(glob::GlobError::into_error).map_err(PsarcError::Io)?;
            matched_any = true;

            if path.is_dir() {
                if flags.contains(EnumFlags::RECURSIVE) {
                    for walked in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
                        if walked.file_type().is_file() {
                            self.push(walked.into_path(), escapes)?;
                        }
                    }
                } else {
                    tracing::debug!(path = %path.display(), "skipping directory match (recursive disabled)");
                }
            } else if path.is_file() {
                self.push(path, escapes)?;
            }
        }

        if !matched_any {
            tracing::warn!(pattern = %full_pattern, "pattern matched no files");
        } else {
            tracing::debug!(pattern = %full_pattern, "pattern expansion complete");
        }
        Ok(())
    }

    /// Canonicalises, deduplicates, and records one matched file per the
    /// three-step procedure in §4.5.
    fn push(&mut self, matched: PathBuf, escapes: bool) -> Result<()> {
        let canonical = matched.canonicalize()?;
        if !self.seen_canonical.insert(canonical.clone()) {
            return Ok(());
        }

        let stored = if escapes {
            canonical.to_string_lossy().into_owned()
        } else {
            let relative = matched.strip_prefix(&self.base_dir).unwrap_or(&matched);
            let mut text = relative.to_string_lossy().into_owned();
            while let Some(rest) = text.strip_prefix("./") {
                text = rest.to_string();
            }
            text
        };

        self.paths.push(stored);
        Ok(())
    }

    /// Consumes the enumerator, returning the ordered, deduplicated path
    /// list that manifest encoding will normalise further.
    pub fn into_paths(self) -> Vec<String> {
        self.paths
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

/// Expands `{a,b,c}` brace groups into their cartesian product, recursively
/// (so `a{b,c}{d,e}` yields four variants). Patterns without braces pass
/// through unchanged.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(start) = pattern.find('{') {
        if let Some(end) = find_matching_brace(pattern, start) {
            let prefix = &pattern[..start];
            let suffix = &pattern[end + 1..];
            let body = &pattern[start + 1..end];

            let mut out = Vec::new();
            for alt in split_top_level_commas(body) {
                out.extend(expand_braces(&format!("{prefix}{alt}{suffix}")));
            }
            return out;
        }
    }
    vec![pattern.to_string()]
}

fn find_matching_brace(pattern: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in pattern.char_indices().skip(open_idx) {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level_commas(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Expands a leading `~` or `~/...` to the user's home directory, read from
/// `$HOME`. Patterns without a leading `~` pass through unchanged.
fn expand_tilde(pattern: &str) -> String {
    if pattern == "~" || pattern.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return pattern.replacen('~', &home, 1);
        }
    }
    pattern.to_string()
}

/// Rewrites every ASCII alphabetic character `c` in the pattern into the
/// character class `[lc uc]`, so the pattern matches case-insensitively even
/// on a case-sensitive filesystem (§4.5).
fn case_insensitive_class(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        if ch.is_ascii_alphabetic() {
            out.push('[');
            out.push(ch.to_ascii_lowercase());
            out.push(ch.to_ascii_uppercase());
            out.push(']');
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn expand_braces_single_group() {
        let mut variants = expand_braces("a{b,c}.txt");
        variants.sort();
        assert_eq!(variants, vec!["ab.txt".to_string(), "ac.txt".to_string()]);
    }

    #[test]
    fn expand_braces_multiple_groups() {
        let mut variants = expand_braces("{a,b}-{1,2}");
        variants.sort();
        assert_eq!(
            variants,
            vec!["a-1".to_string(), "a-2".to_string(), "b-1".to_string(), "b-2".to_string()]
        );
    }

    #[test]
    fn expand_braces_no_braces_passes_through() {
        assert_eq!(expand_braces("plain.txt"), vec!["plain.txt".to_string()]);
    }

    #[test]
    fn case_insensitive_rewrite_leaves_symbols_alone() {
        assert_eq!(case_insensitive_class("a.txt"), "[aA].[tT][xX][tT]");
        assert_eq!(case_insensitive_class("*.rs"), "*.[rR][sS]");
    }

    #[test]
    fn enumerator_dedups_repeated_matches() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut enumerator = Enumerator::new(dir.path());
        enumerator.add_pattern("a.txt", EnumFlags::NONE).unwrap();
        enumerator.add_pattern("./a.txt", EnumFlags::NONE).unwrap();
        enumerator.add_pattern("a.txt", EnumFlags::NONE).unwrap();

        assert_eq!(enumerator.paths().len(), 1);
    }

    #[test]
    fn enumerator_recurses_into_directories_when_flagged() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.txt"), b"x").unwrap();

        let mut enumerator = Enumerator::new(dir.path());
        enumerator.add_pattern("sub", EnumFlags::RECURSIVE).unwrap();
        assert_eq!(enumerator.paths().len(), 1);
        assert!(enumerator.paths()[0].ends_with("inner.txt"));
    }

    #[test]
    fn enumerator_skips_directories_without_recursive_flag() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.txt"), b"x").unwrap();

        let mut enumerator = Enumerator::new(dir.path());
        enumerator.add_pattern("sub", EnumFlags::NONE).unwrap();
        assert_eq!(enumerator.paths().len(), 0);
    }

    #[test]
    fn relative_paths_stay_relative_to_base_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("rel.txt"), b"x").unwrap();

        let mut enumerator = Enumerator::new(dir.path());
        enumerator.add_pattern("rel.txt", EnumFlags::NONE).unwrap();
        assert_eq!(enumerator.paths(), &["rel.txt".to_string()]);
    }
}
