//! Crash-safe persistence helpers for small JSON documents.
//!
//! Writers stage the new content in a temporary file in the target's
//! directory and rename it into place, so a reader observes either the old
//! or the new document and never a truncated one.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CorralError, Result};

/// Atomically replaces `path` with `bytes`.
///
/// The parent directory must already exist; it is not created, so a
/// deleted record directory is never resurrected by a late writer.
///
/// # Errors
///
/// Returns an I/O error if staging, syncing, or renaming fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| CorralError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    staged.write_all(bytes).map_err(|e| CorralError::Io {
        path: staged.path().to_path_buf(),
        source: e,
    })?;
    staged.as_file().sync_all().map_err(|e| CorralError::Io {
        path: staged.path().to_path_buf(),
        source: e,
    })?;
    let _ = staged.persist(path).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns an error if serialization or the atomic write fails.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Reads and deserializes a JSON document, returning `None` if it does
/// not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Rejects documents written by a newer schema than this build supports.
///
/// # Errors
///
/// Returns [`CorralError::UnsupportedSchema`] if `found > supported`.
pub fn check_schema(kind: &'static str, found: u32, supported: u32) -> Result<()> {
    if found > supported {
        return Err(CorralError::UnsupportedSchema {
            kind,
            found,
            supported,
        });
    }
    Ok(())
}

/// Removes a directory tree, treating an already-absent tree as success.
///
/// Returns whether anything was removed.
///
/// # Errors
///
/// Returns an I/O error for any failure other than absence.
pub fn remove_dir_idempotent(path: &Path) -> Result<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "a".into(),
            count: 3,
        };
        write_json(&path, &doc).expect("write");
        let back: Doc = read_json(&path).expect("read").expect("present");
        assert_eq!(back, doc);
    }

    #[test]
    fn write_leaves_no_staging_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"one").expect("first");
        write_atomic(&path, b"two").expect("second");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).expect("readdir").collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone").join("doc.json");
        let err = write_atomic(&path, b"x").expect_err("should fail");
        assert!(matches!(err, CorralError::Io { .. }));
        assert!(!dir.path().join("gone").exists());
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc: Option<Doc> = read_json(&dir.path().join("nope.json")).expect("read");
        assert!(doc.is_none());
    }

    #[test]
    fn schema_check_rejects_newer() {
        assert!(check_schema("container", 1, 1).is_ok());
        assert!(matches!(
            check_schema("container", 2, 1),
            Err(CorralError::UnsupportedSchema { found: 2, .. })
        ));
    }

    #[test]
    fn remove_dir_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");
        std::fs::create_dir_all(target.join("inner")).expect("mkdir");
        assert!(remove_dir_idempotent(&target).expect("first"));
        assert!(!remove_dir_idempotent(&target).expect("second"));
    }
}
