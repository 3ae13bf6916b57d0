//! SHA-256 content digests.

use std::io::Read;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of everything `reader` yields.
///
/// # Errors
///
/// Returns an I/O error attributed to `path` if reading fails.
pub fn hash_reader(mut reader: impl Read, path: &Path) -> Result<Sha256Hash> {
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Sha256Hash::from_hex(hex)
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let file = std::fs::File::open(path).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    hash_reader(file, path)
}
