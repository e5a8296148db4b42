//! The PSARC binary container: header, table-of-contents entries, and the
//! block-size table. Every field here is laid out at an exact byte offset;
//! nothing in this module may reorder or pad what the format specifies.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::byteio::{
    item_width, read_block_item, read_u24, read_u32_be, read_u40, write_block_item, write_u24,
    write_u32_be, write_u40,
};
use crate::error::{PsarcError, Result};

pub const MAGIC: [u8; 4] = *b"PSAR";
pub const HEADER_SIZE: usize = 32;
pub const TOC_ENTRY_SIZE: usize = 30;
pub const DEFAULT_BLOCK_SIZE: u32 = 65_536;

bitflags::bitflags! {
    /// Archive-level flags, stored in the last 4 bytes of the header.
    pub struct ArchiveFlags: u32 {
        const NONE             = 0;
        const CASE_INSENSITIVE = 0b01;
        const ABSOLUTE_PATHS   = 0b10;
    }
}

/// Block codec named in the header. `Store` is never named there; it is a
/// per-block inference made while reading, never a header-level tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Store,
    Zlib,
    Lzma2,
}

impl Codec {
    /// The 4-byte ASCII tag the writer puts in the header for this codec.
    /// `Store` archives still declare `"zlib"` per the format's convention
    /// that the header names a fallback decoder for any stored block.
    fn header_tag(self) -> &'static [u8; 4] {
        match self {
            Codec::Store | Codec::Zlib => b"zlib",
            Codec::Lzma2 => b"lzma",
        }
    }

    fn from_tag(tag: &[u8; 4]) -> Result<Codec> {
        match tag {
            b"zlib" => Ok(Codec::Zlib),
            b"lzma" => Ok(Codec::Lzma2),
            other => Err(PsarcError::UnsupportedCodec {
                tag: String::from_utf8_lossy(other).into_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Default for Version {
    fn default() -> Self {
        Version { major: 1, minor: 4 }
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: Version,
    pub codec: Codec,
    pub toc_length: u32,
    pub entry_count: u32,
    pub block_size: u32,
    pub flags: ArchiveFlags,
}

impl Header {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Header> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| io_or_truncated(e, HEADER_SIZE, 0))?;
        if magic != MAGIC {
            return Err(PsarcError::InvalidMagic { found: magic });
        }

        let version_raw = read_u32_be(reader)?;
        let version = Version {
            major: (version_raw >> 16) as u16,
            minor: (version_raw & 0xFFFF) as u16,
        };

        let mut codec_tag = [0u8; 4];
        reader.read_exact(&mut codec_tag)?;
        let codec = Codec::from_tag(&codec_tag)?;

        let toc_length = read_u32_be(reader)?;
        let toc_entry_size = read_u32_be(reader)?;
        if toc_entry_size as usize != TOC_ENTRY_SIZE {
            return Err(PsarcError::BadToc {
                reason: format!(
                    "toc_entry_size {toc_entry_size} does not match the expected {TOC_ENTRY_SIZE}"
                ),
            });
        }
        let entry_count = read_u32_be(reader)?;
        let block_size = read_u32_be(reader)?;
        let flags_raw = read_u32_be(reader)?;
        let flags = ArchiveFlags::from_bits_truncate(flags_raw);

        Ok(Header {
            version,
            codec,
            toc_length,
            entry_count,
            block_size,
            flags,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        let version_raw = ((self.version.major as u32) << 16) | (self.version.minor as u32);
        write_u32_be(writer, version_raw)?;
        writer.write_all(self.codec.header_tag())?;
        write_u32_be(writer, self.toc_length)?;
        write_u32_be(writer, TOC_ENTRY_SIZE as u32)?;
        write_u32_be(writer, self.entry_count)?;
        write_u32_be(writer, self.block_size)?;
        write_u32_be(writer, self.flags.bits())?;
        Ok(())
    }
}

/// One table-of-contents entry: 16-byte MD5 digest, 4-byte first block
/// index, two 40-bit fields (uncompressed size, file offset).
#[derive(Debug, Clone)]
pub struct TocEntry {
    pub name_digest: [u8; 16],
    pub first_block_index: u32,
    pub uncompressed_size: u64,
    pub file_offset: u64,
}

impl TocEntry {
    pub const MANIFEST_DIGEST: [u8; 16] = [0u8; 16];

    pub fn read_from<R: Read>(reader: &mut R) -> Result<TocEntry> {
        let mut name_digest = [0u8; 16];
        reader.read_exact(&mut name_digest)?;
        let first_block_index = read_u32_be(reader)?;
        let uncompressed_size = read_u40(reader)?;
        let file_offset = read_u40(reader)?;
        Ok(TocEntry {
            name_digest,
            first_block_index,
            uncompressed_size,
            file_offset,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.name_digest)?;
        write_u32_be(writer, self.first_block_index)?;
        write_u40(writer, self.uncompressed_size)?;
        write_u40(writer, self.file_offset)?;
        Ok(())
    }

    /// Number of blocks this entry spans, given the archive's block size.
    /// An empty entry spans zero blocks (§3: `ceil(0 / block_size) == 0`).
    pub fn block_count(&self, block_size: u64) -> u64 {
        if self.uncompressed_size == 0 {
            return 0;
        }
        (self.uncompressed_size + block_size - 1) / block_size
    }
}

/// Reads the dense block-size table: `total_blocks` items of `width` bytes.
pub fn read_block_table<R: Read>(reader: &mut R, width: u8, total_blocks: u64) -> Result<Vec<u32>> {
    let mut table = Vec::with_capacity(total_blocks as usize);
    for _ in 0..total_blocks {
        table.push(read_block_item(reader, width)?);
    }
    Ok(table)
}

pub fn write_block_table<W: Write>(writer: &mut W, width: u8, table: &[u32]) -> Result<()> {
    for &item in table {
        write_block_item(writer, width, item)?;
    }
    Ok(())
}

/// Resolves a raw block-size-table slot (where `0` is the "full block"
/// sentinel) to the actual compressed length of that block.
pub fn resolve_block_size(raw: u32, block_size: u32) -> u32 {
    if raw == 0 {
        block_size
    } else {
        raw
    }
}

/// `toc_length = 32 + entry_count*30 + total_blocks*W` (invariant 4).
pub fn compute_toc_length(entry_count: u32, total_blocks: u64, width: u8) -> u64 {
    HEADER_SIZE as u64 + (entry_count as u64) * (TOC_ENTRY_SIZE as u64) + total_blocks * (width as u64)
}

fn io_or_truncated(e: io::Error, expected: usize, actual: usize) -> PsarcError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PsarcError::Truncated { expected, actual }
    } else {
        PsarcError::Io(e)
    }
}

/// Determines the block-size-table item width from a header, validating the
/// advertised `block_size` and `toc_length` against invariant (4).
pub fn resolve_item_width(header: &Header) -> Result<u8> {
    item_width(header.block_size as u64).ok_or_else(|| PsarcError::BadToc {
        reason: format!("block_size {} is out of range", header.block_size),
    })
}

/// Validates invariant (4) for a fully-parsed header plus the block count
/// implied by the parsed entries, returning the number of block-table items.
pub fn total_blocks_from_toc_length(
    header: &Header,
    width: u8,
) -> Result<u64> {
    let fixed = HEADER_SIZE as u64 + (header.entry_count as u64) * (TOC_ENTRY_SIZE as u64);
    let toc_length = header.toc_length as u64;
    if toc_length < fixed {
        return Err(PsarcError::BadToc {
            reason: format!(
                "toc_length {toc_length} is smaller than the fixed header+TOC region {fixed}"
            ),
        });
    }
    let remainder = toc_length - fixed;
    if remainder % (width as u64) != 0 {
        return Err(PsarcError::BadToc {
            reason: format!(
                "block-size table region ({remainder} bytes) is not a multiple of item width {width}"
            ),
        });
    }
    Ok(remainder / (width as u64))
}

/// Seeks to the exact offset where the first entry's compressed bytes
/// begin, i.e. `toc_length`.
pub fn seek_to_entries<S: Seek>(stream: &mut S, toc_length: u64) -> io::Result<u64> {
    stream.seek(SeekFrom::Start(toc_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> Header {
        Header {
            version: Version::default(),
            codec: Codec::Zlib,
            toc_length: 1000,
            entry_count: 3,
            block_size: DEFAULT_BLOCK_SIZE,
            flags: ArchiveFlags::NONE,
        }
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let mut cursor = Cursor::new(buf);
        let parsed = Header::read_from(&mut cursor).unwrap();
        assert_eq!(parsed.version, header.version);
        assert_eq!(parsed.codec, Codec::Zlib);
        assert_eq!(parsed.toc_length, 1000);
        assert_eq!(parsed.entry_count, 3);
        assert_eq!(parsed.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![b'X', b'X', b'X', b'X'];
        buf.extend_from_slice(&[0u8; HEADER_SIZE - 4]);
        let mut cursor = Cursor::new(buf);
        let err = Header::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, PsarcError::InvalidMagic { .. }));
    }

    #[test]
    fn rejects_unknown_codec_tag() {
        let mut header = sample_header();
        header.codec = Codec::Zlib;
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        // Stomp the codec tag field (bytes 8..12) with something unrecognised.
        buf[8..12].copy_from_slice(b"zstd");
        let mut cursor = Cursor::new(buf);
        let err = Header::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, PsarcError::UnsupportedCodec { .. }));
    }

    #[test]
    fn store_codec_declares_zlib_tag() {
        let mut header = sample_header();
        header.codec = Codec::Store;
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(&buf[8..12], b"zlib");
    }

    #[test]
    fn toc_entry_round_trip() {
        let entry = TocEntry {
            name_digest: [7u8; 16],
            first_block_index: 5,
            uncompressed_size: 123_456_789,
            file_offset: 1_000_000,
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), TOC_ENTRY_SIZE);
        let mut cursor = Cursor::new(buf);
        let parsed = TocEntry::read_from(&mut cursor).unwrap();
        assert_eq!(parsed.name_digest, entry.name_digest);
        assert_eq!(parsed.first_block_index, 5);
        assert_eq!(parsed.uncompressed_size, 123_456_789);
        assert_eq!(parsed.file_offset, 1_000_000);
    }

    #[test]
    fn block_count_matches_ceil_division() {
        let entry = TocEntry {
            name_digest: [0; 16],
            first_block_index: 0,
            uncompressed_size: 200_000,
            file_offset: 0,
        };
        assert_eq!(entry.block_count(65536), 4);
    }

    #[test]
    fn block_count_of_empty_entry_is_zero() {
        let entry = TocEntry {
            name_digest: [0; 16],
            first_block_index: 0,
            uncompressed_size: 0,
            file_offset: 0,
        };
        assert_eq!(entry.block_count(65536), 0);
    }

    #[test]
    fn toc_length_formula() {
        assert_eq!(compute_toc_length(3, 10, 2), 32 + 3 * 30 + 10 * 2);
    }

    #[test]
    fn resolve_sentinel() {
        assert_eq!(resolve_block_size(0, 65536), 65536);
        assert_eq!(resolve_block_size(42, 65536), 42);
    }
}
