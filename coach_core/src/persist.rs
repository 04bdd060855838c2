//! Locked, atomic JSON files.
//!
//! Readers take a shared lock. Writers serialize into a temp file in the
//! same directory under an exclusive lock, sync it and rename it over the
//! target, so a crash never leaves a half-written file behind.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read and parse a JSON file
///
/// Returns `Ok(None)` when the file doesn't exist, can't be read or fails
/// to parse; the latter two are logged as warnings.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match read_locked(path) {
        Ok(Some(contents)) => contents,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!("Unable to read {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }
    };
    Ok(parse_or_warn(path, &contents))
}

/// Like [`read_json`], but open, lock and read failures are errors
///
/// Only a missing file or unparseable contents yield `Ok(None)`. Callers
/// that rewrite the file from what they read use this, so a transient I/O
/// failure never looks like an empty file.
pub fn read_json_strict<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match read_locked(path) {
        Ok(Some(contents)) => contents,
        Ok(None) => return Ok(None),
        Err(e) => {
            return Err(Error::Persistence(format!(
                "unable to read {:?}: {}",
                path, e
            )))
        }
    };
    Ok(parse_or_warn(path, &contents))
}

fn read_locked(path: &Path) -> std::io::Result<Option<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    file.lock_shared()?;
    let mut contents = String::new();
    let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;
    Ok(Some(contents))
}

fn parse_or_warn<T: DeserializeOwned>(path: &Path, contents: &str) -> Option<T> {
    match serde_json::from_str::<T>(contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to parse {:?}: {}. Ignoring it.", path, e);
            None
        }
    }
}

/// Atomically replace `path` with the JSON form of `value`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("{:?} has no parent directory", path)))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(value)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Exclusive cross-process lock held for the guard's lifetime
pub struct FileLockGuard {
    file: File,
}

impl FileLockGuard {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
