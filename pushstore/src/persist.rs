//! Crash-safe persistence file handling.
//!
//! [`write_atomic`] never modifies the destination in place. Records are
//! written to a temporary file in the destination's directory, synced, and
//! renamed over the destination in one step, so a concurrent reader (or a
//! restart after a crash) sees either the previous complete file or the new
//! complete file.
//!
//! ```text
//! dir/
//! ├── metrics.store                       <- destination, only replaced by rename
//! └── metrics.store.in_progress.a1B2c3    <- temporary file while writing
//! ```

use std::ffi::OsString;
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::codec::{RecordWriter, decode_records};
use crate::error::{PersistError, Result};
use crate::family::TimestampedFamily;

/// Suffix inserted between the destination file name and the random part of
/// the temporary file name.
pub const IN_PROGRESS_SUFFIX: &str = ".in_progress.";

/// Atomically replaces `path` with the encoding of `records`.
///
/// Returns the number of records written; families without samples are not
/// written. On any failure the temporary file is removed and the destination
/// is left exactly as it was.
///
/// # Errors
///
/// Returns [`PersistError`] if the temporary file cannot be created, written,
/// synced, or renamed over `path`.
pub fn write_atomic<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a TimestampedFamily>,
{
    let dir = parent_dir(path);
    let mut prefix = path
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    prefix.push(IN_PROGRESS_SUFFIX);

    // Dropping `temp` on any early return deletes the file.
    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(&dir)
        .map_err(|source| PersistError::CreateTemp {
            dir: dir.clone(),
            source,
        })?;
    let temp_path = temp.path().to_path_buf();

    let mut writer = RecordWriter::new(BufWriter::new(temp.as_file()));
    for record in records {
        writer.write(record).map_err(|source| PersistError::Write {
            path: temp_path.clone(),
            source,
        })?;
    }
    let written = writer.written();

    let sync_err = |source: io::Error| PersistError::Sync {
        path: temp_path.clone(),
        source,
    };
    writer
        .into_inner()
        .into_inner()
        .map_err(|e| sync_err(e.into_error()))?;
    temp.as_file().sync_all().map_err(sync_err)?;

    temp.persist(path).map_err(|e| PersistError::Rename {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(written)
}

/// Reads and decodes the persistence file at `path`.
///
/// Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// Returns [`PersistError::Read`] if the file exists but cannot be read, or a
/// codec error if its contents cannot be decoded.
pub fn load(path: &Path) -> Result<Option<Vec<TimestampedFamily>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.to_path_buf(),
                source,
            }
            .into());
        }
    };

    Ok(Some(decode_records(&bytes)?))
}

/// Directory holding `path`, so the rename stays on one filesystem.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
