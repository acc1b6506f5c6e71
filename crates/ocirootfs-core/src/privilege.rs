//! Privilege mode resolution.
//!
//! Decides whether layers are extracted as real root or rootless, and in
//! the rootless case builds the single-entry UID/GID maps that make
//! root-owned archive entries appear owned by the invoking user.

use ocirootfs_common::constants::FULL_ID_MAP;
use ocirootfs_common::error::Result;
use ocirootfs_common::types::{IdMapping, MapOptions};

/// Identity of the process performing the extraction.
///
/// Built once by the caller and passed down, so the pipeline never queries
/// ambient process state on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeContext {
    euid: u32,
    egid: u32,
    unprivileged: bool,
}

impl PrivilegeContext {
    /// Inspects the current process.
    ///
    /// The process is unprivileged when its effective UID is not 0, or when
    /// it is root inside a user namespace that does not map the full host
    /// ID range (i.e. it cannot assume arbitrary IDs).
    #[must_use]
    pub fn detect() -> Self {
        let euid = nix::unistd::geteuid().as_raw();
        let egid = nix::unistd::getegid().as_raw();
        let unprivileged = euid != 0 || inside_remapped_namespace();
        tracing::debug!(euid, egid, unprivileged, "detected process privilege");
        Self {
            euid,
            egid,
            unprivileged,
        }
    }

    /// Builds a context without looking at the process.
    #[must_use]
    pub const fn synthetic(euid: u32, egid: u32, unprivileged: bool) -> Self {
        Self {
            euid,
            egid,
            unprivileged,
        }
    }

    /// Effective host UID.
    #[must_use]
    pub const fn euid(&self) -> u32 {
        self.euid
    }

    /// Effective host GID.
    #[must_use]
    pub const fn egid(&self) -> u32 {
        self.egid
    }

    /// Whether extraction must run rootless.
    #[must_use]
    pub const fn is_unprivileged(&self) -> bool {
        self.unprivileged
    }

    /// Map options for extracting layers under this identity.
    ///
    /// # Errors
    ///
    /// Returns [`ocirootfs_common::error::OcirootfsError::MappingConstruction`]
    /// if a descriptor cannot be built.
    pub fn map_options(&self) -> Result<MapOptions> {
        resolve_map_options(self)
    }
}

/// Computes extraction map options for the given privilege context.
///
/// Unprivileged: rootless with exactly `0 -> euid` and `0 -> egid`, size 1.
/// Privileged: empty options, ownership is applied as-is.
///
/// # Errors
///
/// Returns an error if a mapping descriptor is rejected.
pub fn resolve_map_options(ctx: &PrivilegeContext) -> Result<MapOptions> {
    if !ctx.unprivileged {
        return Ok(MapOptions::default());
    }

    tracing::debug!("setting rootless extraction mode");
    Ok(MapOptions {
        rootless: true,
        uid_mappings: vec![IdMapping::new(0, ctx.euid, 1)?],
        gid_mappings: vec![IdMapping::new(0, ctx.egid, 1)?],
    })
}

/// Whether `/proc/self/uid_map` describes anything but the initial namespace.
#[cfg(target_os = "linux")]
fn inside_remapped_namespace() -> bool {
    match std::fs::read_to_string("/proc/self/uid_map") {
        Ok(content) => !is_full_id_map(&content),
        Err(e) => {
            tracing::debug!(error = %e, "cannot read uid_map, assuming initial namespace");
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
const fn inside_remapped_namespace() -> bool {
    false
}

/// Whether a `uid_map` / `gid_map` body is the single full identity range.
#[must_use]
pub fn is_full_id_map(content: &str) -> bool {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(line) = lines.next() else {
        return false;
    };
    if lines.next().is_some() {
        return false;
    }
    let fields: Vec<u64> = line
        .split_whitespace()
        .filter_map(|f| f.parse().ok())
        .collect();
    let (inside, outside, count) = FULL_ID_MAP;
    fields == [u64::from(inside), u64::from(outside), count]
}
