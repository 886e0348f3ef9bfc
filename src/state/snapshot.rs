//! Binary snapshot of the whole entry table.
//!
//! Layout, little-endian, no padding, no checksum:
//!
//! ```text
//! entry_count: i32
//! repeat entry_count times:
//!   path_length:    u64
//!   path_bytes:     path_length bytes (no terminator)
//!   is_directory:   i32   (0 = file, 1 = directory)
//!   atime:          i64
//!   mtime:          i64
//!   ctime:          i64
//!   content_length: u64   (0 for directories)
//!   content_bytes:  content_length bytes, files only
//! ```
//!
//! `name` and `parent_path` are not stored; they are re-derived on load.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::entry::{Entry, EntryKind};
use super::path;
use super::table::EntryTable;
use crate::error::{Result, SnapfsError};

const FILE_TAG: i32 = 0;
const DIRECTORY_TAG: i32 = 1;

pub fn encode<W: Write>(table: &EntryTable, out: &mut W) -> Result<()> {
    let count = i32::try_from(table.len())
        .map_err(|_| SnapfsError::CorruptSnapshot(format!("{} entries do not fit", table.len())))?;
    out.write_all(&count.to_le_bytes())?;
    for entry in table.iter() {
        let path = entry.full_path().as_bytes();
        out.write_all(&(path.len() as u64).to_le_bytes())?;
        out.write_all(path)?;
        let tag = match entry.kind() {
            EntryKind::File => FILE_TAG,
            EntryKind::Directory => DIRECTORY_TAG,
        };
        out.write_all(&tag.to_le_bytes())?;
        out.write_all(&entry.atime.to_le_bytes())?;
        out.write_all(&entry.mtime.to_le_bytes())?;
        out.write_all(&entry.ctime.to_le_bytes())?;
        out.write_all(&entry.size().to_le_bytes())?;
        if entry.kind() == EntryKind::File {
            out.write_all(entry.content())?;
        }
    }
    Ok(())
}

/// Rebuild a table from snapshot bytes. Fails if the snapshot holds more
/// entries than `capacity`.
pub fn decode<R: Read>(input: &mut R, capacity: NonZeroUsize) -> Result<EntryTable> {
    let count = read_i32(input, "entry count")?;
    if count < 0 {
        return Err(SnapfsError::CorruptSnapshot(format!("negative entry count {}", count)));
    }
    let count = count as usize;
    if count > capacity.get() {
        return Err(SnapfsError::CapacityExceeded {
            capacity: capacity.get(),
        });
    }

    let mut table = EntryTable::new(capacity);
    for index in 0..count {
        let entry = decode_entry(input, index)?;
        match table.insert(entry) {
            Ok(()) => {}
            Err(SnapfsError::AlreadyExists(p)) => {
                return Err(SnapfsError::CorruptSnapshot(format!("duplicate path {}", p)));
            }
            Err(e) => return Err(e),
        }
    }

    let mut trailing = [0u8; 1];
    if input.read(&mut trailing)? != 0 {
        return Err(SnapfsError::CorruptSnapshot(format!(
            "trailing bytes after {} entries",
            count
        )));
    }
    Ok(table)
}

fn decode_entry<R: Read>(input: &mut R, index: usize) -> Result<Entry> {
    let path_len = read_u64(input, "path length")?;
    let path_bytes = read_bytes(input, path_len, "path")?;
    let full_path = String::from_utf8(path_bytes)
        .map_err(|_| SnapfsError::CorruptSnapshot(format!("entry {}: path is not UTF-8", index)))?;
    if !path::is_entry_key(&full_path) {
        return Err(SnapfsError::CorruptSnapshot(format!(
            "entry {}: invalid path {:?}",
            index, full_path
        )));
    }

    let kind = match read_i32(input, "kind")? {
        FILE_TAG => EntryKind::File,
        DIRECTORY_TAG => EntryKind::Directory,
        other => {
            return Err(SnapfsError::CorruptSnapshot(format!(
                "entry {}: unknown kind {}",
                index, other
            )))
        }
    };
    let atime = read_i64(input, "atime")?;
    let mtime = read_i64(input, "mtime")?;
    let ctime = read_i64(input, "ctime")?;
    let content_len = read_u64(input, "content length")?;

    let mut entry = Entry::new(&full_path, kind, ctime)?;
    match kind {
        EntryKind::Directory if content_len != 0 => {
            return Err(SnapfsError::CorruptSnapshot(format!(
                "directory {} has {} content bytes",
                full_path, content_len
            )));
        }
        EntryKind::Directory => {}
        EntryKind::File => {
            let content = read_bytes(input, content_len, "content")?;
            entry.set_content(content)?;
        }
    }
    entry.atime = atime;
    entry.mtime = mtime;
    entry.ctime = ctime;
    Ok(entry)
}

fn read_array<const N: usize, R: Read>(input: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf).map_err(|e| truncated(e, what))?;
    Ok(buf)
}

fn read_i32<R: Read>(input: &mut R, what: &str) -> Result<i32> {
    read_array::<4, R>(input, what).map(i32::from_le_bytes)
}

fn read_i64<R: Read>(input: &mut R, what: &str) -> Result<i64> {
    read_array::<8, R>(input, what).map(i64::from_le_bytes)
}

fn read_u64<R: Read>(input: &mut R, what: &str) -> Result<u64> {
    read_array::<8, R>(input, what).map(u64::from_le_bytes)
}

/// Read exactly `len` bytes without trusting `len` for the up-front allocation.
fn read_bytes<R: Read>(input: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    input.take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(SnapfsError::CorruptSnapshot(format!(
            "{} truncated: expected {} bytes, found {}",
            what,
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

fn truncated(e: io::Error, what: &str) -> SnapfsError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SnapfsError::CorruptSnapshot(format!("{} truncated", what))
    } else {
        SnapfsError::Io(e)
    }
}

/// Load a snapshot file. A missing file yields `Ok(None)`.
pub fn load(path: &Path, capacity: NonZeroUsize) -> Result<Option<EntryTable>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let table = decode(&mut BufReader::new(file), capacity)?;
    info!("Loaded {} entries from {}", table.len(), path.display());
    Ok(Some(table))
}

pub fn save(path: &Path, table: &EntryTable) -> Result<()> {
    let mut buf = Vec::new();
    encode(table, &mut buf)?;
    write_atomic(path, &buf)?;
    info!("Saved {} entries to {}", table.len(), path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` next to `path` and rename over it, so an interrupted write
/// leaves the previous snapshot in place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    if let Err(e) = write_then_rename(&tmp, path, bytes) {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", tmp.display(), cleanup);
            }
        }
        return Err(e.into());
    }
    debug!("Wrote {} snapshot bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = File::create(tmp)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);
    std::fs::rename(tmp, path)
}
