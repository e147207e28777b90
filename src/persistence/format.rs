//! Binary encoding helpers for snapshot files.
//!
//! All integers are little-endian. Byte strings are `[len: u32][bytes]`.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Magic bytes at the start of every snapshot file.
pub const SNAP_MAGIC: &[u8; 4] = b"STSN";

/// Current snapshot format version.
pub const FORMAT_VERSION: u8 = 1;

/// Upper bound on a single length-prefixed field, so a corrupt length
/// can't trigger a huge allocation.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur when reading or writing snapshots.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("crc32 mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("snapshot writer is not open")]
    NotOpen,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub fn write_u8(w: &mut impl Write, val: u8) -> io::Result<()> {
    w.write_all(&[val])
}

pub fn write_u32(w: &mut impl Write, val: u32) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

pub fn write_u64(w: &mut impl Write, val: u64) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

/// Writes `[len: u32][data]`.
pub fn write_bytes(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("field length {} exceeds u32::MAX", data.len()),
        )
    })?;
    write_u32(w, len)?;
    w.write_all(data)
}

/// Writes the magic and version.
pub fn write_header(w: &mut impl Write) -> io::Result<()> {
    w.write_all(SNAP_MAGIC)?;
    write_u8(w, FORMAT_VERSION)
}

pub fn read_u8(r: &mut impl Read) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf)?;
    Ok(buf[0])
}

pub fn read_u32(r: &mut impl Read) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(r: &mut impl Read) -> Result<u64, FormatError> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads `[len: u32][data]`.
pub fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, FormatError> {
    let len = read_u32(r)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(FormatError::InvalidData(format!(
            "field length {len} exceeds maximum of {MAX_FIELD_LEN}"
        )));
    }
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    Ok(buf)
}

/// Reads and checks the magic and version.
pub fn read_header(r: &mut impl Read) -> Result<(), FormatError> {
    let mut magic = [0u8; 4];
    read_exact(r, &mut magic)?;
    if &magic != SNAP_MAGIC {
        return Err(FormatError::InvalidMagic);
    }
    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(())
}

fn read_exact(r: &mut impl Read, buf: &mut [u8]) -> Result<(), FormatError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::UnexpectedEof
        } else {
            FormatError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        read_header(&mut Cursor::new(&buf)).unwrap();
    }

    #[test]
    fn bad_magic() {
        let buf = b"NOPE\x01".to_vec();
        assert!(matches!(
            read_header(&mut Cursor::new(&buf)),
            Err(FormatError::InvalidMagic)
        ));
    }

    #[test]
    fn bad_version() {
        let mut buf = SNAP_MAGIC.to_vec();
        buf.push(99);
        assert!(matches!(
            read_header(&mut Cursor::new(&buf)),
            Err(FormatError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn truncated_field() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 10).unwrap();
        buf.extend_from_slice(b"abc");
        assert!(matches!(
            read_bytes(&mut Cursor::new(&buf)),
            Err(FormatError::UnexpectedEof)
        ));
    }

    #[test]
    fn oversized_field_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, u32::MAX).unwrap();
        assert!(matches!(
            read_bytes(&mut Cursor::new(&buf)),
            Err(FormatError::InvalidData(_))
        ));
    }
}
