//! Per-stash snapshot files.
//!
//! Each stash with snapshots enabled is written to its own file in the
//! snapshot directory. Writes go to a `.snap.tmp` file first and are
//! atomically renamed on commit, so a crash mid-write never damages the
//! previous snapshot.
//!
//! File layout:
//! ```text
//! [STSN magic: 4B][version: 1B][entry_count: 4B]
//! [name_len: 4B][name][max_key_count: 8B][off_heap: 1B]
//! [entries...]
//! [footer_crc32: 4B]
//! ```
//!
//! Each entry:
//! ```text
//! [key_len: 4B][key][value_len: 4B][value][expires_at_ms: 8B]
//! ```
//! `expires_at_ms` is an absolute Unix epoch time, or 0 for no expiry. The
//! footer CRC covers the entry count and everything after it.
//!
//! File names are the hex-encoded stash name, so any name is safe on disk.

use crate::persistence::format::{self, FormatError};
use crate::storage::stash::{Stash, StashEntry, StashError};
use crate::storage::ttl::epoch_millis;
use bytes::Bytes;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Marker for "never expires" in the entry encoding.
const NO_EXPIRY: u64 = 0;

/// Byte offset of the entry count: magic (4) + version (1).
const COUNT_OFFSET: u64 = 5;

/// Smallest encoded entry: two empty length prefixes and the expiry.
const MIN_ENTRY_LEN: usize = 4 + 4 + 8;

/// File extension for committed snapshots.
const SNAP_EXTENSION: &str = "snap";

/// Destination for one stash's snapshot.
///
/// Call order: `open`, `write_metadata`, any number of `write_entry`,
/// then `commit`. `close` abandons an uncommitted snapshot; `delete`
/// removes the committed one.
pub trait SnapshotWriter {
    fn open(&mut self) -> Result<(), FormatError>;

    fn write_metadata(
        &mut self,
        name: &str,
        max_key_count: usize,
        off_heap: bool,
    ) -> Result<(), FormatError>;

    fn write_entry(
        &mut self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<u64>,
    ) -> Result<(), FormatError>;

    fn commit(&mut self) -> Result<(), FormatError>;

    fn close(&mut self);

    fn delete(&mut self) -> Result<(), FormatError>;
}

/// Writes a snapshot file through a temp file and an atomic rename.
pub struct FileSnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    hasher: crc32fast::Hasher,
    count: u32,
}

impl FileSnapshotWriter {
    /// Creates a writer for `path`. Nothing touches the disk until `open`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let final_path = path.into();
        let tmp_path = final_path.with_extension("snap.tmp");
        Self {
            final_path,
            tmp_path,
            writer: None,
            hasher: crc32fast::Hasher::new(),
            count: 0,
        }
    }

    /// Where the committed snapshot lives.
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    fn append(&mut self, buf: &[u8]) -> Result<(), FormatError> {
        let writer = self.writer.as_mut().ok_or(FormatError::NotOpen)?;
        self.hasher.update(buf);
        writer.write_all(buf)?;
        Ok(())
    }
}

impl fmt::Debug for FileSnapshotWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSnapshotWriter")
            .field("path", &self.final_path)
            .field("open", &self.writer.is_some())
            .field("count", &self.count)
            .finish()
    }
}

impl SnapshotWriter for FileSnapshotWriter {
    fn open(&mut self) -> Result<(), FormatError> {
        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.tmp_path)?);
        format::write_header(&mut writer)?;
        // patched with the real count on commit
        format::write_u32(&mut writer, 0)?;

        self.writer = Some(writer);
        self.hasher = crc32fast::Hasher::new();
        self.count = 0;
        Ok(())
    }

    fn write_metadata(
        &mut self,
        name: &str,
        max_key_count: usize,
        off_heap: bool,
    ) -> Result<(), FormatError> {
        let mut buf = Vec::new();
        format::write_bytes(&mut buf, name.as_bytes())?;
        format::write_u64(&mut buf, max_key_count as u64)?;
        format::write_u8(&mut buf, off_heap as u8)?;
        self.append(&buf)
    }

    fn write_entry(
        &mut self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<u64>,
    ) -> Result<(), FormatError> {
        let mut buf = Vec::with_capacity(key.len() + value.len() + 16);
        format::write_bytes(&mut buf, key)?;
        format::write_bytes(&mut buf, value)?;
        format::write_u64(&mut buf, expires_at.unwrap_or(NO_EXPIRY))?;
        self.append(&buf)?;
        self.count += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), FormatError> {
        let mut writer = self.writer.take().ok_or(FormatError::NotOpen)?;
        // the count is only known now, but it sits in front of the body
        let mut crc = crc32fast::Hasher::new();
        crc.update(&self.count.to_le_bytes());
        crc.combine(&self.hasher);
        format::write_u32(&mut writer, crc.finalize())?;
        writer.flush()?;

        let file = writer.get_mut();
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        format::write_u32(file, self.count)?;
        file.sync_all()?;
        drop(writer);

        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.writer.take().is_some() {
            // best-effort cleanup of the incomplete temp file
            let _ = fs::remove_file(&self.tmp_path);
        }
    }

    fn delete(&mut self) -> Result<(), FormatError> {
        self.close();
        match fs::remove_file(&self.final_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileSnapshotWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// A stash read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStash {
    pub name: String,
    pub max_key_count: usize,
    pub off_heap: bool,
    pub entries: Vec<StashEntry>,
}

/// Reads and verifies one snapshot file.
///
/// Entries whose expiration has already passed are left out. The entry
/// count is checked against the file size before anything is allocated.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<LoadedStash, FormatError> {
    let data = fs::read(path.as_ref())?;
    let mut cursor = Cursor::new(&data[..]);

    format::read_header(&mut cursor)?;
    let count = format::read_u32(&mut cursor)?;

    let body_start = cursor.position() as usize;
    if data.len() < body_start + 4 {
        return Err(FormatError::UnexpectedEof);
    }
    let body_end = data.len() - 4;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let actual = crc32fast::hash(&data[COUNT_OFFSET as usize..body_end]);
    if stored != actual {
        return Err(FormatError::ChecksumMismatch {
            expected: stored,
            actual,
        });
    }

    let mut body = Cursor::new(&data[body_start..body_end]);
    let name = String::from_utf8(format::read_bytes(&mut body)?)
        .map_err(|_| FormatError::InvalidData("stash name is not valid utf-8".into()))?;
    let max_key_count = format::read_u64(&mut body)? as usize;
    let off_heap = format::read_u8(&mut body)? != 0;

    let remaining = body.get_ref().len() - body.position() as usize;
    if count as usize > remaining / MIN_ENTRY_LEN {
        return Err(FormatError::InvalidData(format!(
            "entry count {count} does not fit in {remaining} bytes"
        )));
    }

    let now = epoch_millis();
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = format::read_bytes(&mut body)?;
        let value = format::read_bytes(&mut body)?;
        let expires_at = match format::read_u64(&mut body)? {
            NO_EXPIRY => None,
            at => Some(at),
        };
        if expires_at.is_some_and(|at| at <= now) {
            continue;
        }
        entries.push(StashEntry {
            key: Bytes::from(key),
            value: Bytes::from(value),
            expires_at,
        });
    }

    Ok(LoadedStash {
        name,
        max_key_count,
        off_heap,
        entries,
    })
}

/// The snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a stash's snapshot is written to.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex_encode(name.as_bytes()), SNAP_EXTENSION))
    }

    /// A writer for a stash's snapshot file.
    pub fn writer_for(&self, name: &str) -> FileSnapshotWriter {
        FileSnapshotWriter::new(self.path_for(name))
    }

    /// Writes a full snapshot of `stash`. Returns the number of entries.
    ///
    /// A stash that is dropped while being written leaves no file behind.
    pub fn save(&self, stash: &Stash) -> Result<usize, FormatError> {
        let entries = match stash.entries() {
            Ok(entries) => entries,
            Err(StashError::Closed) => return Ok(0),
        };

        let options = stash.options();
        let mut writer = self.writer_for(stash.name());
        writer.open()?;
        writer.write_metadata(stash.name(), options.max_key_count, options.off_heap)?;
        for entry in &entries {
            writer.write_entry(&entry.key, &entry.value, entry.expires_at)?;
        }
        writer.commit()?;

        if stash.is_closed() {
            writer.delete()?;
            return Ok(0);
        }

        debug!(stash = %stash.name(), entries = entries.len(), "Snapshot written");
        Ok(entries.len())
    }

    /// Removes a stash's snapshot file, if any.
    pub fn delete(&self, name: &str) -> Result<(), FormatError> {
        self.writer_for(name).delete()
    }

    /// Reads every snapshot in the directory.
    ///
    /// A missing directory is an empty result. Unreadable files are
    /// logged and skipped.
    pub fn load_all(&self) -> Result<Vec<LoadedStash>, FormatError> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAP_EXTENSION) {
                continue;
            }
            match read_snapshot(&path) {
                Ok(stash) => loaded.push(stash),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(loaded)
    }
}

fn hex_encode(data: &[u8]) -> String {
    use std::fmt::Write as _;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
