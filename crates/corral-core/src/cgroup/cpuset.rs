//! CPU-set control.

use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::CgroupLayout;

/// Restricts a cgroup instance to the CPUs listed in `mask`.
///
/// On the legacy hierarchy a fresh cpuset has empty `cpuset.mems`, which
/// makes it unusable; it is seeded from the parent when possible.
///
/// # Errors
///
/// Returns an error if writing `cpuset.cpus` fails.
pub fn set_cpus(cgroup_path: &Path, layout: CgroupLayout, mask: &str) -> Result<()> {
    if layout == CgroupLayout::Legacy {
        inherit_mems(cgroup_path);
    }
    let file = cgroup_path.join("cpuset.cpus");
    std::fs::write(&file, mask).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(cpus = mask, "cpuset set");
    Ok(())
}

fn inherit_mems(cgroup_path: &Path) {
    let own = cgroup_path.join("cpuset.mems");
    let current = std::fs::read_to_string(&own).unwrap_or_default();
    if !current.trim().is_empty() {
        return;
    }
    let inherited = cgroup_path
        .ancestors()
        .skip(1)
        .map(|p| p.join("cpuset.mems"))
        .find_map(|p| {
            std::fs::read_to_string(p)
                .ok()
                .filter(|m| !m.trim().is_empty())
        });
    if let Some(mems) = inherited {
        if let Err(e) = std::fs::write(&own, mems.trim()) {
            tracing::debug!(error = %e, "cpuset.mems not inherited");
        }
    }
}
