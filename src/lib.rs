//! Core library for the PSARC archive engine: the binary container codec,
//! the chunked compression pipeline, the ordered worker pool that drives
//! concurrent writes, the pattern-based file enumerator, and the archive
//! reader/writer built on top of them.
//!
//! The command-line argument parser and the multi-format report emitter are
//! deliberately out of scope here; this crate only signals report events
//! (see [`report`]) and exposes plain option structs for the driver to fill.

pub mod byteio;
pub mod codec;
pub mod container;
pub mod enumerator;
pub mod error;
pub mod manifest;
pub mod pool;
pub mod reader;
pub mod report;
pub mod writer;

pub use error::{PsarcError, Result};
