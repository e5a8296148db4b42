//! Error taxonomy for the PSARC engine.
//!
//! Mirrors the archive's own failure modes rather than wrapping every
//! possible `std::io::Error` kind individually: callers branch on these
//! variants to pick an exit code, not on the wrapped OS error.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PsarcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("truncated archive: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("not a PSARC archive: bad magic {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("unsupported codec tag {tag:?}")]
    UnsupportedCodec { tag: String },

    #[error("corrupt table of contents: {reason}")]
    BadToc { reason: String },

    #[error("codec refused to decode block {block_index}: {reason}")]
    DecodeError { block_index: u64, reason: String },

    #[error("decompressed block {block_index} size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        block_index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("out of memory")]
    OutOfMemory,

    #[error("output already exists: {path}")]
    Conflict { path: PathBuf },

    #[error("no input files matched the given patterns")]
    NoInputs,
}

pub type Result<T> = std::result::Result<T, PsarcError>;
