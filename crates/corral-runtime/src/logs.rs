//! Captured container output.
//!
//! A background container's stdout and stderr go to one file in its
//! state directory, created by the launcher before the process starts.

use std::fs::{File, OpenOptions};
use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Opens (creating or truncating) the log file for a new container.
///
/// # Errors
///
/// Returns an error if the file cannot be created.
pub fn create_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Reads captured output.
///
/// Returns an empty string if nothing was captured, as for a container
/// run attached to a terminal.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = read_logs(&dir.path().join("container.log")).expect("read");
        assert!(content.is_empty());
    }

    #[test]
    fn written_output_is_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        let mut file = create_log(&path).expect("create");
        file.write_all(b"line one\nline two\n").expect("write");
        drop(file);

        assert_eq!(read_logs(&path).expect("read"), "line one\nline two\n");
    }

    #[test]
    fn create_truncates_previous_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, "stale").expect("seed");
        drop(create_log(&path).expect("create"));
        assert!(read_logs(&path).expect("read").is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.log");
        std::fs::write(&path, [b'o', b'k', 0xff]).expect("seed");
        assert_eq!(read_logs(&path).expect("read"), "ok\u{fffd}");
    }
}
