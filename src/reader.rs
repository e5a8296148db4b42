//! Archive reader (§4.7): parses the header, TOC, and block-size table,
//! decodes the manifest, and serves list/info/extract requests.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::container::{self, ArchiveFlags, Codec, Header, TocEntry};
use crate::error::{PsarcError, Result};
use crate::manifest;
use crate::report::{EntryOutcome, ReportEvent, ReportSink};

/// One opened archive: header, full TOC, resolved block-size table, and the
/// filenames recovered from the manifest, aligned 1:1 with `entries[1..]`.
pub struct OpenArchive {
    path: PathBuf,
    file: File,
    header: Header,
    entries: Vec<TocEntry>,
    block_table: Vec<u32>,
    names: Vec<String>,
}

impl OpenArchive {
    pub fn open(path: &Path) -> Result<OpenArchive> {
        let mut file = File::open(path)?;
        let header = Header::read_from(&mut file)?;
        let width = container::resolve_item_width(&header)?;

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            entries.push(TocEntry::read_from(&mut file)?);
        }

        let total_blocks = container::total_blocks_from_toc_length(&header, width)?;
        let block_table = container::read_block_table(&mut file, width, total_blocks)?;

        if entries.is_empty() {
            return Err(PsarcError::BadToc {
                reason: "archive declares zero entries; a manifest entry is always required".into(),
            });
        }

        validate_offsets(&header, &entries, &block_table)?;

        let manifest_entry = &entries[0];
        let manifest_bytes = decode_entry_bytes(&mut file, &header, manifest_entry, &block_table)?;
        let names = manifest::decode(&manifest_bytes, entries.len() - 1)?;

        tracing::info!(path = %path.display(), entry_count = header.entry_count, "archive opened");

        Ok(OpenArchive {
            path: path.to_path_buf(),
            file,
            header,
            entries,
            block_table,
            names,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn flags(&self) -> ArchiveFlags {
        self.header.flags
    }

    /// Sum of a single entry's resolved block sizes (its compressed size).
    fn entry_compressed_size(&self, entry: &TocEntry) -> u64 {
        let count = entry.block_count(self.header.block_size as u64) as usize;
        let start = entry.first_block_index as usize;
        self.block_table[start..start + count]
            .iter()
            .map(|&raw| container::resolve_block_size(raw, self.header.block_size) as u64)
            .sum()
    }

    pub fn list(&self) -> Vec<ListRow> {
        self.entries[1..]
            .iter()
            .zip(self.names.iter())
            .map(|(entry, name)| ListRow {
                name: name.clone(),
                uncompressed_size: entry.uncompressed_size,
                compressed_size: self.entry_compressed_size(entry),
            })
            .collect()
    }

    /// §4.7 info: list plus manifest/file totals, physical size, and the
    /// archive's effective codec (inferred by whether any block actually
    /// carries a compression signature, not just the header's tag).
    pub fn info(&mut self) -> Result<ArchiveInfo> {
        let manifest_entry = self.entries[0].clone();
        let manifest_compressed = self.entry_compressed_size(&manifest_entry);

        let mut files_uncompressed = 0u64;
        let mut files_compressed = 0u64;
        let mut effective_codec = Codec::Store;

        let file_entries: Vec<TocEntry> = self.entries[1..].to_vec();
        for entry in &file_entries {
            files_uncompressed += entry.uncompressed_size;
            let compressed = self.entry_compressed_size(entry);
            files_compressed += compressed;

            if effective_codec == Codec::Store {
                let sizes = self.resolved_sizes_for(entry);
                let mut offset = entry.file_offset;
                for size in sizes {
                    self.file.seek(SeekFrom::Start(offset))?;
                    let mut probe = vec![0u8; size.min(6) as usize];
                    self.file.read_exact(&mut probe)?;
                    if codec::detect_codec(&probe) != Codec::Store {
                        effective_codec = self.header.codec;
                        break;
                    }
                    offset += size as u64;
                }
            }
        }

        let last_entry = self.entries.last().unwrap().clone();
        let physical_size = last_entry.file_offset + self.entry_compressed_size(&last_entry);

        Ok(ArchiveInfo {
            entry_count: self.header.entry_count,
            block_size: self.header.block_size,
            flags: self.header.flags,
            manifest_uncompressed: manifest_entry.uncompressed_size,
            manifest_compressed,
            files_uncompressed,
            files_compressed,
            physical_size,
            effective_codec,
        })
    }

    fn resolved_sizes_for(&self, entry: &TocEntry) -> Vec<u32> {
        let count = entry.block_count(self.header.block_size as u64) as usize;
        let start = entry.first_block_index as usize;
        self.block_table[start..start + count]
            .iter()
            .map(|&raw| container::resolve_block_size(raw, self.header.block_size))
            .collect()
    }

    /// §4.7 extract: empty `patterns` extracts everything; otherwise only
    /// entries whose name matches the (case-normalised, per archive flags)
    /// pattern set.
    pub fn extract(&mut self, opts: &ExtractOptions, sink: &dyn ReportSink) -> Result<ExtractSummary> {
        sink.emit(&ReportEvent::OpenArchive {
            path: &self.path,
            mode: "extract",
        });

        let case_insensitive = self.header.flags.contains(ArchiveFlags::CASE_INSENSITIVE);
        let match_set: Option<HashSet<String>> = if opts.patterns.is_empty() {
            None
        } else {
            Some(
                opts.patterns
                    .iter()
                    .map(|p| normalize_for_match(p, case_insensitive))
                    .collect(),
            )
        };

        let mut success = 0u32;
        let mut skipped = 0u32;
        let mut failed = 0u32;

        let entries = self.entries[1..].to_vec();
        let names = self.names.clone();

        for (entry, name) in entries.iter().zip(names.iter()) {
            if let Some(set) = &match_set {
                if !set.contains(&normalize_for_match(name, case_insensitive)) {
                    continue;
                }
            }

            sink.emit(&ReportEvent::BeginEntry {
                name,
                index: entry.first_block_index,
            });

            let stored_name = if opts.trim_paths {
                name.rsplit('/').next().unwrap_or(name).to_string()
            } else {
                name.trim_start_matches('/').to_string()
            };
            let out_path = opts.target_dir.join(&stored_name);

            if out_path.exists() {
                if opts.overwrite {
                    // fall through to (re)write
                } else if opts.skip_existing_files {
                    sink.emit(&ReportEvent::EndEntry {
                        name,
                        uncompressed_size: entry.uncompressed_size,
                        compressed_size: self.entry_compressed_size(entry),
                        outcome: EntryOutcome::Skipped,
                    });
                    tracing::warn!(name, "skipped: file already exists");
                    skipped += 1;
                    continue;
                } else {
                    sink.emit(&ReportEvent::EndEntry {
                        name,
                        uncompressed_size: entry.uncompressed_size,
                        compressed_size: self.entry_compressed_size(entry),
                        outcome: EntryOutcome::Failed,
                    });
                    tracing::error!(name, "failed: file already exists");
                    failed += 1;
                    continue;
                }
            }

            match self.extract_one(entry, &out_path) {
                Ok(()) => {
                    sink.emit(&ReportEvent::EndEntry {
                        name,
                        uncompressed_size: entry.uncompressed_size,
                        compressed_size: self.entry_compressed_size(entry),
                        outcome: EntryOutcome::Success,
                    });
                    success += 1;
                }
                Err(err) => {
                    sink.emit(&ReportEvent::Error {
                        message: err.to_string(),
                    });
                    failed += 1;
                }
            }
        }

        sink.emit(&ReportEvent::Close {
            entry_count: self.header.entry_count,
            total_uncompressed: entries.iter().map(|e| e.uncompressed_size).sum(),
            total_compressed: entries.iter().map(|e| self.entry_compressed_size(e)).sum(),
            failed,
        });

        Ok(ExtractSummary { success, skipped, failed })
    }

    fn extract_one(&mut self, entry: &TocEntry, out_path: &Path) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(out_path)?;
        let bytes = decode_entry_bytes(&mut self.file, &self.header, entry, &self.block_table)?;
        out.write_all(&bytes)?;
        Ok(())
    }
}

/// Validates invariant (3): entries are laid out contiguously in stored
/// order starting at `toc_length`, with no padding. Checked once up front
/// on open so a structurally-inconsistent archive is rejected with
/// `BadToc` rather than silently misread (short reads, garbage bytes
/// decoded as another entry's blocks, and so on).
fn validate_offsets(header: &Header, entries: &[TocEntry], block_table: &[u32]) -> Result<()> {
    let mut expected_offset = header.toc_length as u64;
    for (i, entry) in entries.iter().enumerate() {
        if entry.file_offset != expected_offset {
            return Err(PsarcError::BadToc {
                reason: format!(
                    "entry {i} file_offset {} does not match the expected contiguous offset {expected_offset}",
                    entry.file_offset
                ),
            });
        }
        expected_offset += compressed_size_of(entry, block_table, header.block_size)?;
    }
    Ok(())
}

/// Sum of an entry's resolved block sizes, bounds-checked against the
/// block-size table (invariant 2). Used while validating a freshly-opened
/// archive, where the TOC cannot yet be trusted.
fn compressed_size_of(entry: &TocEntry, block_table: &[u32], block_size: u32) -> Result<u64> {
    let count = entry.block_count(block_size as u64) as usize;
    let start = entry.first_block_index as usize;
    let end = start + count;
    let slice = block_table.get(start..end).ok_or_else(|| PsarcError::BadToc {
        reason: format!(
            "entry's block range [{start}..{end}) is out of bounds for a {}-item block table",
            block_table.len()
        ),
    })?;
    Ok(slice
        .iter()
        .map(|&raw| container::resolve_block_size(raw, block_size) as u64)
        .sum())
}

fn normalize_for_match(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_ascii_lowercase()
    } else {
        name.to_string()
    }
}

/// Reads and decodes every block of one entry, returning its full
/// uncompressed bytes.
fn decode_entry_bytes(
    file: &mut File,
    header: &Header,
    entry: &TocEntry,
    block_table: &[u32],
) -> Result<Vec<u8>> {
    let block_size = header.block_size as u64;
    let count = entry.block_count(block_size) as usize;
    let start = entry.first_block_index as usize;

    file.seek(SeekFrom::Start(entry.file_offset))?;

    let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
    for k in 0..count {
        let raw = block_table[start + k];
        let compressed_size = container::resolve_block_size(raw, header.block_size) as usize;
        let mut compressed = vec![0u8; compressed_size];
        file.read_exact(&mut compressed)?;

        let natural = if k + 1 == count {
            entry.uncompressed_size - (k as u64) * block_size
        } else {
            block_size
        };

        let decoded = codec::decode_block(&compressed, natural as usize, (start + k) as u64)?;
        out.extend_from_slice(&decoded);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ListRow {
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub entry_count: u32,
    pub block_size: u32,
    pub flags: ArchiveFlags,
    pub manifest_uncompressed: u64,
    pub manifest_compressed: u64,
    pub files_uncompressed: u64,
    pub files_compressed: u64,
    pub physical_size: u64,
    pub effective_codec: Codec,
}

pub struct ExtractOptions {
    pub target_dir: PathBuf,
    pub patterns: Vec<String>,
    pub trim_paths: bool,
    pub overwrite: bool,
    pub skip_existing_files: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractSummary {
    pub success: u32,
    pub skipped: u32,
    pub failed: u32,
}
