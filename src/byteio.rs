//! Big-endian integer primitives for the PSARC container.
//!
//! `byteorder` covers the 16/32/64-bit cases directly; the 24-bit and 40-bit
//! fields used by the table of contents and block-size table have no native
//! Rust integer type, so they get hand-rolled read/write helpers here.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Reads a 24-bit unsigned big-endian integer (3 bytes).
pub fn read_u24<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 3];
    reader.read_exact(&mut buf)?;
    Ok(((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32))
}

/// Writes a 24-bit unsigned big-endian integer (3 bytes). Truncates silently
/// above 2^24; callers are expected to have validated the range already.
pub fn write_u24<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    let buf = [
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    ];
    writer.write_all(&buf)
}

/// Reads a 40-bit unsigned big-endian integer (5 bytes), used for
/// `uncompressed_size` and `file_offset` in TOC entries.
pub fn read_u40<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 5];
    reader.read_exact(&mut buf)?;
    let mut value: u64 = 0;
    for b in buf {
        value = (value << 8) | (b as u64);
    }
    Ok(value)
}

/// Writes a 40-bit unsigned big-endian integer (5 bytes).
///
/// # Panics
/// Panics if `value >= 2^40`; callers validate sizes before reaching here.
pub fn write_u40<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    assert!(value < (1u64 << 40), "value {value} does not fit in 40 bits");
    let buf = [
        ((value >> 32) & 0xFF) as u8,
        ((value >> 24) & 0xFF) as u8,
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    ];
    writer.write_all(&buf)
}

pub fn read_u16_be<R: Read>(reader: &mut R) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

pub fn write_u16_be<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_u16::<BigEndian>(value)
}

pub fn read_u32_be<R: Read>(reader: &mut R) -> io::Result<u32> {
    reader.read_u32::<BigEndian>()
}

pub fn write_u32_be<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_u32::<BigEndian>(value)
}

/// Smallest block-size-table item width `W` (in bytes, 1..=4) such that
/// `block_size <= 2^(8*W)`. `block_size == 0` is invalid and rejected by callers.
pub fn item_width(block_size: u64) -> Option<u8> {
    if block_size == 0 || block_size > (1u64 << 32) {
        return None;
    }
    if block_size <= (1 << 8) {
        Some(1)
    } else if block_size <= (1 << 16) {
        Some(2)
    } else if block_size <= (1 << 24) {
        Some(3)
    } else {
        Some(4)
    }
}

/// Reads one block-size-table item of the given width, mapping the `0`
/// sentinel to `None` (meaning "full block size") so callers resolve it
/// against `block_size` explicitly.
pub fn read_block_item<R: Read>(reader: &mut R, width: u8) -> io::Result<u32> {
    match width {
        1 => Ok(reader.read_u8()? as u32),
        2 => Ok(read_u16_be(reader)? as u32),
        3 => read_u24(reader),
        4 => read_u32_be(reader),
        other => panic!("invalid block-size-table item width {other}"),
    }
}

pub fn write_block_item<W: Write>(writer: &mut W, width: u8, value: u32) -> io::Result<()> {
    match width {
        1 => writer.write_u8(value as u8),
        2 => write_u16_be(writer, value as u16),
        3 => write_u24(writer, value),
        4 => write_u32_be(writer, value),
        other => panic!("invalid block-size-table item width {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn u40_round_trip() {
        let mut buf = Vec::new();
        write_u40(&mut buf, 0x12_3456_789A).unwrap();
        assert_eq!(buf.len(), 5);
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u40(&mut cursor).unwrap(), 0x12_3456_789A);
    }

    #[test]
    fn u24_round_trip() {
        let mut buf = Vec::new();
        write_u24(&mut buf, 0xABCDEF).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u24(&mut cursor).unwrap(), 0xABCDEF);
    }

    #[test]
    fn item_width_boundaries() {
        assert_eq!(item_width(1), Some(1));
        assert_eq!(item_width(256), Some(1));
        assert_eq!(item_width(257), Some(2));
        assert_eq!(item_width(65536), Some(2));
        assert_eq!(item_width(65537), Some(3));
        assert_eq!(item_width(1 << 24), Some(3));
        assert_eq!(item_width((1 << 24) + 1), Some(4));
        assert_eq!(item_width(1u64 << 32), Some(4));
        assert_eq!(item_width((1u64 << 32) + 1), None);
        assert_eq!(item_width(0), None);
    }

    #[test]
    fn block_item_sentinel_round_trip() {
        let mut buf = Vec::new();
        write_block_item(&mut buf, 2, 0).unwrap();
        write_block_item(&mut buf, 2, 4096).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_block_item(&mut cursor, 2).unwrap(), 0);
        assert_eq!(read_block_item(&mut cursor, 2).unwrap(), 4096);
    }
}
