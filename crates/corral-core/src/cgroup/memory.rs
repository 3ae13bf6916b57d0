//! Memory limit control.
//!
//! Writes `memory.max` on the unified hierarchy and
//! `memory.limit_in_bytes` on the legacy one.

use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::CgroupLayout;

/// Control file holding the hard memory limit for `layout`.
#[must_use]
pub const fn limit_file(layout: CgroupLayout) -> &'static str {
    match layout {
        CgroupLayout::Unified => "memory.max",
        CgroupLayout::Legacy => "memory.limit_in_bytes",
    }
}

/// Sets the hard memory limit of a cgroup instance.
///
/// # Errors
///
/// Returns an error if writing the limit file fails.
pub fn set_memory_limit(cgroup_path: &Path, layout: CgroupLayout, bytes: u64) -> Result<()> {
    let file = cgroup_path.join(limit_file(layout));
    std::fs::write(&file, bytes.to_string()).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(bytes, "memory limit set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_layout_specific_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_memory_limit(dir.path(), CgroupLayout::Unified, 100).expect("v2");
        set_memory_limit(dir.path(), CgroupLayout::Legacy, 200).expect("v1");
        assert_eq!(std::fs::read_to_string(dir.path().join("memory.max")).expect("read"), "100");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("memory.limit_in_bytes")).expect("read"),
            "200"
        );
    }
}
