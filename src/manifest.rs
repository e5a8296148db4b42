//! Manifest codec: entry 0 of every archive is a newline-separated list of
//! the filenames stored in entries 1..N, subject to the path-normalisation
//! rules driven by the archive's flags.

use crate::container::ArchiveFlags;
use crate::error::{PsarcError, Result};

/// Normalises a single path for storage in the manifest, per §4.2:
/// backslashes become forward slashes, a drive-letter prefix is stripped,
/// and then the path is made absolute or relative per `flags`, and trimmed
/// to its basename if `trim_paths` is set.
pub fn normalize_path(raw: &str, flags: ArchiveFlags, trim_paths: bool) -> String {
    let mut path = raw.replace('\\', "/");

    if let Some(rest) = strip_drive_letter(&path) {
        path = rest.to_string();
    }

    if trim_paths {
        path = path.rsplit('/').next().unwrap_or(&path).to_string();
    }

    if flags.contains(ArchiveFlags::ABSOLUTE_PATHS) {
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
    } else {
        while path.starts_with('/') {
            path.remove(0);
        }
    }

    path
}

/// Strips a `C:` style drive-letter prefix, if present, returning the
/// remainder (including any leading separator).
fn strip_drive_letter(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some(&path[2..])
    } else {
        None
    }
}

/// Builds the manifest byte buffer from an ordered list of already-enumerated
/// paths (which are normalised here before being joined).
pub fn encode(paths: &[String], flags: ArchiveFlags, trim_paths: bool) -> Vec<u8> {
    let normalized: Vec<String> = paths
        .iter()
        .map(|p| normalize_path(p, flags, trim_paths))
        .collect();
    normalized.join("\n").into_bytes()
}

/// Decodes manifest bytes into the ordered filename list, verifying that
/// exactly `expected_count` names are produced (invariant 5 / §9 resolution:
/// a mismatch is `Truncated`, not silently ignored).
pub fn decode(data: &[u8], expected_count: usize) -> Result<Vec<String>> {
    if expected_count == 0 {
        return Ok(Vec::new());
    }

    // Mirrors the "decompress into uncompressed_size + 1, append a NUL, split
    // on \n" procedure: since we already have a fully decompressed buffer we
    // simply split directly, but we still reject embedded interior NULs the
    // same way a C-string split would truncate a name.
    let text = String::from_utf8_lossy(data);
    let names: Vec<String> = if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n')
            .map(|s| s.trim_end_matches('\0').to_string())
            .collect()
    };

    if names.len() != expected_count {
        return Err(PsarcError::Truncated {
            expected: expected_count,
            actual: names.len(),
        });
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(
            normalize_path("foo\\bar\\baz.txt", ArchiveFlags::NONE, false),
            "foo/bar/baz.txt"
        );
    }

    #[test]
    fn strips_drive_letter_and_absolute() {
        let flags = ArchiveFlags::ABSOLUTE_PATHS;
        assert_eq!(normalize_path("C:\\foo\\bar", flags, false), "/foo/bar");
    }

    #[test]
    fn relative_strips_leading_slash() {
        assert_eq!(normalize_path("/foo/bar", ArchiveFlags::NONE, false), "foo/bar");
    }

    #[test]
    fn absolute_prepends_slash_when_missing() {
        let flags = ArchiveFlags::ABSOLUTE_PATHS;
        assert_eq!(normalize_path("foo/bar", flags, false), "/foo/bar");
    }

    #[test]
    fn trim_paths_keeps_only_basename() {
        assert_eq!(normalize_path("a/b/c.txt", ArchiveFlags::NONE, true), "c.txt");
    }

    #[test]
    fn encode_decode_round_trip() {
        let paths = vec!["a/one.txt".to_string(), "b/two.txt".to_string()];
        let bytes = encode(&paths, ArchiveFlags::NONE, false);
        assert_eq!(bytes, b"a/one.txt\nb/two.txt");
        let decoded = decode(&bytes, 2).unwrap();
        assert_eq!(decoded, paths);
    }

    #[test]
    fn decode_rejects_count_mismatch() {
        let bytes = b"a\nb\nc".to_vec();
        let err = decode(&bytes, 2).unwrap_err();
        assert!(matches!(err, PsarcError::Truncated { .. }));
    }

    #[test]
    fn decode_empty_manifest() {
        assert_eq!(decode(&[], 0).unwrap(), Vec::<String>::new());
    }
}
