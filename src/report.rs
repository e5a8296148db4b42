//! Report events the core emits while creating, listing, or extracting an
//! archive. Formatting them into the standard/JSON/CSV/XML text a user sees
//! is a sink's job, not the core's — this module only defines the signal.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub enum ReportEvent<'a> {
    OpenArchive { path: &'a Path, mode: &'static str },
    BeginEntry { name: &'a str, index: u32 },
    EndEntry {
        name: &'a str,
        uncompressed_size: u64,
        compressed_size: u64,
        outcome: EntryOutcome,
    },
    Error { message: String },
    Close {
        entry_count: u32,
        total_uncompressed: u64,
        total_compressed: u64,
        failed: u32,
    },
}

/// Receives report events as they occur. The core calls this synchronously
/// and never buffers events itself.
pub trait ReportSink {
    fn emit(&self, event: &ReportEvent);
}

/// A sink that discards every event; useful for library callers that only
/// want the returned summary value.
pub struct NullSink;

impl ReportSink for NullSink {
    fn emit(&self, _event: &ReportEvent) {}
}
