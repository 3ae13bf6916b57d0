//! CPU share control.
//!
//! Shares are expressed in the legacy `cpu.shares` scale (2..=262144,
//! default 1024). On the unified hierarchy they are converted to the
//! `cpu.weight` scale (1..=10000).

use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::CgroupLayout;

const SHARES_MIN: u64 = 2;
const SHARES_MAX: u64 = 262_144;
const WEIGHT_MAX: u64 = 10_000;

/// Converts a `cpu.shares` value to a `cpu.weight` value.
#[must_use]
pub const fn shares_to_weight(shares: u64) -> u64 {
    let shares = if shares < SHARES_MIN {
        SHARES_MIN
    } else if shares > SHARES_MAX {
        SHARES_MAX
    } else {
        shares
    };
    1 + ((shares - SHARES_MIN) * (WEIGHT_MAX - 1)) / (SHARES_MAX - SHARES_MIN)
}

/// Sets the relative CPU share of a cgroup instance.
///
/// # Errors
///
/// Returns an error if writing the share file fails.
pub fn set_cpu_shares(cgroup_path: &Path, layout: CgroupLayout, shares: u64) -> Result<()> {
    let (file, value) = match layout {
        CgroupLayout::Unified => (cgroup_path.join("cpu.weight"), shares_to_weight(shares)),
        CgroupLayout::Legacy => (cgroup_path.join("cpu.shares"), shares),
    };
    std::fs::write(&file, value.to_string()).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(shares, value, "CPU share set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_conversion_covers_both_ends() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(0), 1);
        assert_eq!(shares_to_weight(u64::MAX), 10_000);
    }

    #[test]
    fn legacy_writes_raw_shares() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_cpu_shares(dir.path(), CgroupLayout::Legacy, 512).expect("set");
        assert_eq!(std::fs::read_to_string(dir.path().join("cpu.shares")).expect("read"), "512");
    }
}
