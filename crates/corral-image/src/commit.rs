//! Snapshotting a directory tree into an image tarball.

use std::io::{Seek, SeekFrom};
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;

use crate::hash;

/// Archives the contents of `source` into a tar file at `dest`.
///
/// Entries are stored relative to `source`, symlinks are kept as links,
/// and the archive is staged next to `dest` and renamed into place.
/// Returns the digest of the written archive.
///
/// # Errors
///
/// Returns an error if `source` cannot be walked or `dest` cannot be
/// written.
pub fn archive_dir(source: &Path, dest: &Path) -> Result<Sha256Hash> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| CorralError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| CorralError::Io { path, source: e }
    };

    let staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    let mut builder = tar::Builder::new(staged);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source).map_err(io_err(source))?;
    let mut staged = builder.into_inner().map_err(io_err(dest))?;

    let file = staged.as_file_mut();
    file.sync_all().map_err(io_err(dest))?;
    let _ = file.seek(SeekFrom::Start(0)).map_err(io_err(dest))?;
    let digest = hash::hash_reader(&*file, dest)?;

    let _ = staged.persist(dest).map_err(|e| CorralError::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    tracing::info!(source = %source.display(), dest = %dest.display(), digest = %digest, "directory archived");
    Ok(digest)
}
