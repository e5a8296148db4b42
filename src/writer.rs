//! Archive writer (§4.6): enumerates input files, builds the manifest,
//! reserves the header/TOC/block-table region, streams every entry through
//! the block pipeline (synchronously or via the ordered worker pool), then
//! backfills the reserved region with final offsets and sizes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};

use crate::byteio::item_width;
use crate::codec::{self, EncodedBlock};
use crate::container::{self, ArchiveFlags, Codec, Header, TocEntry, Version};
use crate::enumerator::{EnumFlags, Enumerator};
use crate::error::{PsarcError, Result};
use crate::manifest;
use crate::pool::{BlockCommitter, OrderedWorkerPool};
use crate::report::{EntryOutcome, ReportEvent, ReportSink};

/// Everything the command surface (§6) exposes for `create` mode.
pub struct CreateOptions {
    pub archive_path: PathBuf,
    pub source_dir: PathBuf,
    pub patterns: Vec<String>,
    pub recursive: bool,
    pub ignore_case: bool,
    pub absolute_paths: bool,
    pub trim_paths: bool,
    pub codec: Codec,
    pub level: u32,
    pub extreme: bool,
    pub block_size: u32,
    pub num_threads: usize,
    pub overwrite: bool,
}

pub struct CreateSummary {
    pub entry_count: u32,
    pub total_uncompressed: u64,
    pub total_compressed: u64,
    pub physical_size: u64,
}

struct PendingFile {
    source_path: PathBuf,
    normalized: String,
    uncompressed_size: u64,
    first_block_index: u64,
    block_count: u64,
}

pub fn create_archive(opts: &CreateOptions, sink: &dyn ReportSink) -> Result<CreateSummary> {
    if opts.archive_path.exists() && !opts.overwrite {
        return Err(PsarcError::Conflict {
            path: opts.archive_path.clone(),
        });
    }

    sink.emit(&ReportEvent::OpenArchive {
        path: &opts.archive_path,
        mode: "create",
    });
    tracing::info!(archive = %opts.archive_path.display(), "creating archive");

    let mut enum_flags = EnumFlags::NONE;
    if opts.recursive {
        enum_flags |= EnumFlags::RECURSIVE;
    }
    if opts.ignore_case {
        enum_flags |= EnumFlags::CASE_INSENSITIVE;
    }

    let mut enumerator = Enumerator::new(&opts.source_dir);
    for pattern in &opts.patterns {
        enumerator.add_pattern(pattern, enum_flags)?;
    }
    let raw_paths = enumerator.into_paths();
    if raw_paths.is_empty() {
        return Err(PsarcError::NoInputs);
    }
    tracing::debug!(count = raw_paths.len(), "enumerator produced file list");

    let mut archive_flags = ArchiveFlags::NONE;
    if opts.ignore_case {
        archive_flags |= ArchiveFlags::CASE_INSENSITIVE;
    }
    if opts.absolute_paths {
        archive_flags |= ArchiveFlags::ABSOLUTE_PATHS;
    }

    let block_size = opts.block_size as u64;
    let width = item_width(block_size).ok_or_else(|| PsarcError::BadToc {
        reason: format!("block_size {block_size} is out of range"),
    })?;

    let manifest_bytes = manifest::encode(&raw_paths, archive_flags, opts.trim_paths);
    let manifest_block_count = codec::block_lengths(manifest_bytes.len() as u64, block_size).len() as u64;

    let mut pending = Vec::with_capacity(raw_paths.len());
    let mut running_block = manifest_block_count;
    for raw in &raw_paths {
        let source_path = opts.source_dir.join(raw);
        let meta = std::fs::metadata(&source_path)?;
        let size = meta.len();
        let block_count = codec::block_lengths(size, block_size).len() as u64;
        let normalized = manifest::normalize_path(raw, archive_flags, opts.trim_paths);
        pending.push(PendingFile {
            source_path,
            normalized,
            uncompressed_size: size,
            first_block_index: running_block,
            block_count,
        });
        running_block += block_count;
    }
    let total_blocks = running_block;
    let entry_count = (pending.len() + 1) as u32;

    let toc_length = container::compute_toc_length(entry_count, total_blocks, width);

    let outcome = write_body(
        opts,
        archive_flags,
        width,
        toc_length,
        entry_count,
        total_blocks,
        manifest_block_count,
        &manifest_bytes,
        &pending,
        sink,
    );

    if outcome.is_err() {
        let _ = std::fs::remove_file(&opts.archive_path);
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
fn write_body(
    opts: &CreateOptions,
    archive_flags: ArchiveFlags,
    width: u8,
    toc_length: u64,
    entry_count: u32,
    total_blocks: u64,
    manifest_block_count: u64,
    manifest_bytes: &[u8],
    pending: &[PendingFile],
    sink: &dyn ReportSink,
) -> Result<CreateSummary> {
    let block_size = opts.block_size as u64;
    let mut file = File::create(&opts.archive_path)?;
    file.write_all(&vec![0u8; toc_length as usize])?;

    let mut block_table = vec![0u32; total_blocks as usize];

    {
        let mut cursor = io::Cursor::new(manifest_bytes);
        stream_entry_sync(
            &mut cursor,
            manifest_bytes.len() as u64,
            block_size,
            opts.codec,
            opts.level,
            opts.extreme,
            &mut file,
            &mut block_table[0..manifest_block_count as usize],
        )?;
    }

    let block_table = if opts.num_threads == 0 {
        for pf in pending {
            sink.emit(&ReportEvent::BeginEntry {
                name: &pf.normalized,
                index: pf.first_block_index as u32,
            });
            let mut source = File::open(&pf.source_path)?;
            let range = pf.first_block_index as usize..(pf.first_block_index + pf.block_count) as usize;
            stream_entry_sync(
                &mut source,
                pf.uncompressed_size,
                block_size,
                opts.codec,
                opts.level,
                opts.extreme,
                &mut file,
                &mut block_table[range],
            )?;
        }
        block_table
    } else {
        let committer = Arc::new(ArchiveCommitter {
            file: Mutex::new(file.try_clone()?),
            block_table: Mutex::new(block_table),
            block_index_base: manifest_block_count,
        });
        {
            let pool = OrderedWorkerPool::new(opts.num_threads, Arc::clone(&committer) as Arc<dyn BlockCommitter>);
            for pf in pending {
                sink.emit(&ReportEvent::BeginEntry {
                    name: &pf.normalized,
                    index: pf.first_block_index as u32,
                });
                let source = File::open(&pf.source_path)?;
                stream_entry_via_pool(&pool, source, pf.uncompressed_size, block_size, opts.codec, opts.level, opts.extreme)?;
            }
            pool.wait_for_completion()?;
        }
        Arc::try_unwrap(committer)
            .unwrap_or_else(|_| unreachable!("pool dropped, committer uniquely held"))
            .block_table
            .into_inner()
            .unwrap()
    };

    // Post-hoc offset/size derivation (§9): writes already landed strictly
    // in ticket order, so summing the final block table reconstructs every
    // entry's compressed size and offset without a live accumulator.
    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut offset = toc_length;

    let manifest_compressed: u64 = block_table[0..manifest_block_count as usize]
        .iter()
        .map(|&v| v as u64)
        .sum();
    entries.push(TocEntry {
        name_digest: TocEntry::MANIFEST_DIGEST,
        first_block_index: 0,
        uncompressed_size: manifest_bytes.len() as u64,
        file_offset: offset,
    });
    let mut total_uncompressed = manifest_bytes.len() as u64;
    let mut total_compressed = manifest_compressed;
    offset += manifest_compressed;

    for pf in pending {
        let range = pf.first_block_index as usize..(pf.first_block_index + pf.block_count) as usize;
        let compressed: u64 = block_table[range].iter().map(|&v| v as u64).sum();
        let digest: [u8; 16] = Md5::digest(pf.normalized.as_bytes()).into();
        entries.push(TocEntry {
            name_digest: digest,
            first_block_index: pf.first_block_index as u32,
            uncompressed_size: pf.uncompressed_size,
            file_offset: offset,
        });
        sink.emit(&ReportEvent::EndEntry {
            name: &pf.normalized,
            uncompressed_size: pf.uncompressed_size,
            compressed_size: compressed,
            outcome: EntryOutcome::Success,
        });
        total_uncompressed += pf.uncompressed_size;
        total_compressed += compressed;
        offset += compressed;
    }

    let header = Header {
        version: Version::default(),
        codec: opts.codec,
        toc_length: toc_length as u32,
        entry_count,
        block_size: opts.block_size,
        flags: archive_flags,
    };

    file.seek(SeekFrom::Start(0))?;
    header.write_to(&mut file)?;
    for entry in &entries {
        entry.write_to(&mut file)?;
    }
    let resolved_table: Vec<u32> = block_table
        .iter()
        .map(|&v| if v as u64 == block_size { 0 } else { v })
        .collect();
    container::write_block_table(&mut file, width, &resolved_table)?;
    file.flush()?;

    sink.emit(&ReportEvent::Close {
        entry_count,
        total_uncompressed,
        total_compressed,
        failed: 0,
    });
    tracing::info!(entry_count, total_compressed, "archive created");

    Ok(CreateSummary {
        entry_count,
        total_uncompressed,
        total_compressed,
        physical_size: offset,
    })
}

fn stream_entry_sync<R: Read>(
    reader: &mut R,
    total_len: u64,
    block_size: u64,
    codec: Codec,
    level: u32,
    extreme: bool,
    file: &mut File,
    block_table: &mut [u32],
) -> Result<()> {
    let mut index = 0usize;
    for len in codec::block_lengths(total_len, block_size) {
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        let encoded = codec::encode_block(&buf, codec, level, extreme)?;
        file.write_all(&encoded.bytes)?;
        block_table[index] = encoded.bytes.len() as u32;
        index += 1;
    }
    Ok(())
}

fn stream_entry_via_pool(
    pool: &OrderedWorkerPool,
    mut reader: impl Read + Send + 'static,
    total_len: u64,
    block_size: u64,
    codec: Codec,
    level: u32,
    extreme: bool,
) -> Result<()> {
    for len in codec::block_lengths(total_len, block_size) {
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        pool.submit(Box::new(move || codec::encode_block(&buf, codec, level, extreme)))?;
    }
    Ok(())
}

/// Writes each worker's committed bytes to the archive (strictly in ticket
/// order, enforced by the pool) and records the emitted length at the
/// corresponding global block index. Ticket `t` maps to global block index
/// `block_index_base + (t - 1)`, since entries 1..N are submitted to a
/// single pool instance in one continuous sequence after the manifest's
/// blocks were already written synchronously.
struct ArchiveCommitter {
    file: Mutex<File>,
    block_table: Mutex<Vec<u32>>,
    block_index_base: u64,
}

impl BlockCommitter for ArchiveCommitter {
    fn commit(&self, ticket: u64, outcome: EncodedBlock) -> Result<()> {
        {
            let mut file = self.file.lock().unwrap();
            file.write_all(&outcome.bytes)?;
        }
        let idx = (self.block_index_base + ticket - 1) as usize;
        let mut table = self.block_table.lock().unwrap();
        table[idx] = outcome.bytes.len() as u32;
        Ok(())
    }
}
