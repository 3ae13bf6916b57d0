//! Image tarball extraction.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Unpacks a plain or gzip-compressed tar archive into `target`.
///
/// `target` is created if missing. Ownership and permissions recorded in
/// the archive are preserved so an unpacked root filesystem keeps its
/// setuid binaries and root-owned files.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or unpacked.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting image archive"
    );
    std::fs::create_dir_all(target).map_err(|e| CorralError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;
    let file = File::open(archive_path).map_err(|e| CorralError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    if is_gzip_archive(archive_path) {
        unpack(flate2::read::GzDecoder::new(file), target)
    } else {
        unpack(file, target)
    }
}

fn unpack(reader: impl Read, target: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(true);
    archive.set_unpack_xattrs(true);
    archive.unpack(target).map_err(|e| CorralError::Io {
        path: target.to_path_buf(),
        source: e,
    })
}

/// Whether the archive is gzip-compressed, judged by extension.
#[must_use]
pub fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}
