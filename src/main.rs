//! Command-line driver for the PSARC engine: hand-rolled argument parsing
//! (no argument-parsing crate — out of scope per the library's contract),
//! dispatch into `psarc_engine`, and a plain-text report sink.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};

use psarc_engine::container::Codec;
use psarc_engine::reader::{ExtractOptions, OpenArchive};
use psarc_engine::report::{EntryOutcome, ReportEvent, ReportSink};
use psarc_engine::writer::{create_archive, CreateOptions};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("psarc: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let mode = args.next().context("usage: psarc <create|extract|list|info> ...")?;

    match mode.as_str() {
        "create" => run_create(args),
        "extract" => run_extract(args),
        "list" => run_list(args),
        "info" => run_info(args),
        other => bail!("unknown mode {other:?}; expected create, extract, list, or info"),
    }
}

struct TextSink;

impl ReportSink for TextSink {
    fn emit(&self, event: &ReportEvent) {
        match event {
            ReportEvent::OpenArchive { path, mode } => {
                println!("{mode}: {}", path.display());
            }
            ReportEvent::BeginEntry { name, .. } => {
                println!("  {name}");
            }
            ReportEvent::EndEntry {
                name,
                uncompressed_size,
                compressed_size,
                outcome,
            } => {
                let tag = match outcome {
                    EntryOutcome::Success => "ok",
                    EntryOutcome::Skipped => "skipped",
                    EntryOutcome::Failed => "failed",
                };
                println!("  {name}: {uncompressed_size} -> {compressed_size} bytes [{tag}]");
            }
            ReportEvent::Error { message } => {
                eprintln!("  error: {message}");
            }
            ReportEvent::Close {
                entry_count,
                total_uncompressed,
                total_compressed,
                failed,
            } => {
                println!(
                    "done: {entry_count} entries, {total_uncompressed} -> {total_compressed} bytes, {failed} failed"
                );
            }
        }
    }
}

fn run_create(args: impl Iterator<Item = String>) -> anyhow::Result<ExitCode> {
    let mut archive_path = None;
    let mut source_dir = PathBuf::from(".");
    let mut patterns = Vec::new();
    let mut recursive = false;
    let mut ignore_case = false;
    let mut absolute_paths = false;
    let mut trim_paths = false;
    let mut codec = Codec::Store;
    let mut level = 6u32;
    let mut extreme = false;
    let mut block_size = psarc_engine::container::DEFAULT_BLOCK_SIZE;
    let mut num_threads = default_thread_count();
    let mut overwrite = false;

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--source-dir" => source_dir = PathBuf::from(next_value(&mut args, "--source-dir")?),
            "--recursive" => recursive = true,
            "--ignore-case" => ignore_case = true,
            "--absolute-paths" => absolute_paths = true,
            "--trim-paths" => trim_paths = true,
            "--overwrite" => overwrite = true,
            "--extreme" => extreme = true,
            "--codec" => codec = parse_codec(&next_value(&mut args, "--codec")?)?,
            "--level" => level = next_value(&mut args, "--level")?.parse().context("--level")?,
            "--block-size" => block_size = next_value(&mut args, "--block-size")?.parse().context("--block-size")?,
            "--threads" => num_threads = next_value(&mut args, "--threads")?.parse().context("--threads")?,
            other if archive_path.is_none() => archive_path = Some(PathBuf::from(other)),
            other => patterns.push(other.to_string()),
        }
    }

    let archive_path = archive_path.context("create requires an archive path")?;
    if patterns.is_empty() {
        bail!("create requires at least one file pattern");
    }
    if level == 0 && codec != Codec::Lzma2 {
        bail!("compression level 0 is only valid with the lzma codec");
    }
    if level > 9 {
        bail!("compression level must be between 0 and 9");
    }

    let opts = CreateOptions {
        archive_path,
        source_dir,
        patterns,
        recursive,
        ignore_case,
        absolute_paths,
        trim_paths,
        codec,
        level,
        extreme,
        block_size,
        num_threads,
        overwrite,
    };

    create_archive(&opts, &TextSink)?;
    Ok(ExitCode::from(0))
}

fn run_extract(args: impl Iterator<Item = String>) -> anyhow::Result<ExitCode> {
    let mut archive_path = None;
    let mut target_dir = PathBuf::from(".");
    let mut patterns = Vec::new();
    let mut trim_paths = false;
    let mut overwrite = false;
    let mut skip_existing_files = false;

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--target-dir" => target_dir = PathBuf::from(next_value(&mut args, "--target-dir")?),
            "--trim-paths" => trim_paths = true,
            "--overwrite" => overwrite = true,
            "--skip-existing" => skip_existing_files = true,
            other if archive_path.is_none() => archive_path = Some(PathBuf::from(other)),
            other => patterns.push(other.to_string()),
        }
    }

    let archive_path = archive_path.context("extract requires an archive path")?;
    let mut archive = OpenArchive::open(&archive_path)?;
    let opts = ExtractOptions {
        target_dir,
        patterns,
        trim_paths,
        overwrite,
        skip_existing_files,
    };

    let summary = archive.extract(&opts, &TextSink)?;
    Ok(if summary.failed > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::from(0)
    })
}

fn run_list(mut args: impl Iterator<Item = String>) -> anyhow::Result<ExitCode> {
    let archive_path = PathBuf::from(args.next().context("list requires an archive path")?);
    let archive = OpenArchive::open(&archive_path)?;
    for row in archive.list() {
        println!("{}\t{}\t{}", row.name, row.uncompressed_size, row.compressed_size);
    }
    Ok(ExitCode::from(0))
}

fn run_info(mut args: impl Iterator<Item = String>) -> anyhow::Result<ExitCode> {
    let archive_path = PathBuf::from(args.next().context("info requires an archive path")?);
    let mut archive = OpenArchive::open(&archive_path)?;
    let info = archive.info()?;
    println!("entries: {}", info.entry_count);
    println!("block size: {}", info.block_size);
    println!("flags: {:?}", info.flags);
    println!("manifest: {} -> {} bytes", info.manifest_uncompressed, info.manifest_compressed);
    println!("files: {} -> {} bytes", info.files_uncompressed, info.files_compressed);
    println!("physical size: {} bytes", info.physical_size);
    println!("effective codec: {:?}", info.effective_codec);
    Ok(ExitCode::from(0))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next().with_context(|| format!("{flag} requires a value"))
}

fn parse_codec(raw: &str) -> anyhow::Result<Codec> {
    match raw {
        "store" => Ok(Codec::Store),
        "zlib" => Ok(Codec::Zlib),
        "lzma" => Ok(Codec::Lzma2),
        other => bail!("unknown codec {other:?}; expected store, zlib, or lzma"),
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
