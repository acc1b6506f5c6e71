//! Rootfs unpack pipeline.
//!
//! Opens the bundle's OCI layout, resolves the privilege mode, normalizes
//! the manifest, extracts the layers and finally applies the bundle's
//! permission policy. Stages run strictly in order; the first fatal error
//! aborts the build.

use std::fs;
use std::io;
use std::path::Path;

use ocirootfs_common::config::UnpackerConfig;
use ocirootfs_common::constants::FIX_PERMS_WARNING;
use ocirootfs_common::error::{OcirootfsError, Result};
use ocirootfs_common::types::{BuildOptions, Bundle, SystemContext};
use ocirootfs_core::perms::{check_perms, fix_perms};
use ocirootfs_core::privilege::PrivilegeContext;

use crate::layout::{LayoutBackend, LayoutHandle, OciLayoutBackend, UnpackOptions};
use crate::manifest::normalize_manifest;
use crate::source::ImageSource;

/// Materializes image rootfs trees for bundles.
#[derive(Debug, Clone)]
pub struct RootfsUnpacker<B = OciLayoutBackend> {
    backend: B,
    privilege: PrivilegeContext,
    config: UnpackerConfig,
}

impl RootfsUnpacker<OciLayoutBackend> {
    /// Creates an unpacker backed by on-disk OCI layouts.
    #[must_use]
    pub const fn new(privilege: PrivilegeContext, config: UnpackerConfig) -> Self {
        Self::with_backend(OciLayoutBackend, privilege, config)
    }
}

impl<B: LayoutBackend> RootfsUnpacker<B> {
    /// Creates an unpacker with a custom layout backend.
    #[must_use]
    pub const fn with_backend(
        backend: B,
        privilege: PrivilegeContext,
        config: UnpackerConfig,
    ) -> Self {
        Self {
            backend,
            privilege,
            config,
        }
    }

    /// Privilege context the unpacker extracts under.
    #[must_use]
    pub const fn privilege(&self) -> &PrivilegeContext {
        &self.privilege
    }

    /// Populates `bundle.rootfs_path` with the contents of `source`.
    ///
    /// Anything already at `bundle.rootfs_path` is deleted first.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage: layout open, mapping
    /// construction, manifest fetch/type/decode, removal of the old rootfs,
    /// extraction, or the permission policy.
    pub fn unpack(
        &self,
        bundle: &Bundle,
        source: &dyn ImageSource,
        sys_ctx: &SystemContext,
    ) -> Result<()> {
        tracing::info!(
            reference = source.reference(),
            rootfs = %bundle.rootfs_path.display(),
            "unpacking image rootfs"
        );

        let layout = self
            .backend
            .open_layout(&bundle.tmp_dir)
            .map_err(|e| OcirootfsError::LayoutOpen {
                path: bundle.tmp_dir.clone(),
                source: Box::new(e),
            })?;

        let map_options = self.privilege.map_options()?;
        let manifest = normalize_manifest(source, sys_ctx)?;

        remove_existing(&bundle.rootfs_path)?;

        let options = UnpackOptions {
            map_options,
            verbosity: self.config.verbosity,
            verify_digests: self.config.verify_digests,
        };
        layout
            .unpack_rootfs(&bundle.rootfs_path, &manifest, &options)
            .map_err(|e| OcirootfsError::Unpack {
                path: bundle.rootfs_path.clone(),
                source: Box::new(e),
            })?;

        apply_permission_policy(&bundle.rootfs_path, bundle.opts)
    }
}

/// Unpacks `source` into `bundle` as the current process, with defaults.
///
/// # Errors
///
/// See [`RootfsUnpacker::unpack`].
pub fn unpack_rootfs(
    bundle: &Bundle,
    source: &dyn ImageSource,
    sys_ctx: &SystemContext,
) -> Result<()> {
    RootfsUnpacker::new(PrivilegeContext::detect(), UnpackerConfig::default())
        .unpack(bundle, source, sys_ctx)
}

/// Applies the post-unpack permission policy selected by `opts`.
///
/// `fix_perms` wins over `sandbox_target`; with neither set the tree is
/// left untouched.
///
/// # Errors
///
/// Returns [`OcirootfsError::FixPerms`] or [`OcirootfsError::Walk`].
pub fn apply_permission_policy(rootfs: &Path, opts: BuildOptions) -> Result<()> {
    if opts.fix_perms {
        tracing::warn!("{FIX_PERMS_WARNING}");
        return fix_perms(rootfs);
    }
    if opts.sandbox_target {
        tracing::debug!(path = %rootfs.display(), "scanning for restrictive permissions");
        return check_perms(rootfs);
    }
    Ok(())
}

/// Deletes whatever is at `path`; extraction needs a fresh destination.
fn remove_existing(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OcirootfsError::io(path, e)),
    };
    tracing::debug!(path = %path.display(), "removing existing rootfs");
    if meta.is_dir() {
        // A previous build may have left directories the owner cannot write.
        if let Err(e) = fix_perms(path) {
            tracing::debug!(error = %e, "could not loosen permissions before removal");
        }
        fs::remove_dir_all(path).map_err(|e| OcirootfsError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| OcirootfsError::io(path, e))
    }
}
