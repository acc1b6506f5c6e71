//! Post-unpack permission policies.
//!
//! A rootfs extracted from an image may contain directories the owner
//! cannot enter or modify, which later breaks a plain `rm -rf` of the
//! bundle. [`fix_perms`] repairs such trees; [`check_perms`] only reports
//! them.

use std::fs::{self, Metadata, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ocirootfs_common::constants::{OWNER_RW, OWNER_RWX, RESTRICTIVE_PERMS_WARNINGS};
use ocirootfs_common::error::{OcirootfsError, Result};

use crate::walk::{Step, WalkOutcome, walk};

/// Warns if any directory under `rootfs` lacks owner `rwx`.
///
/// A restrictive entry is advisory only: the three remediation hints are
/// logged and the call succeeds.
///
/// # Errors
///
/// Returns [`OcirootfsError::Walk`] if an entry cannot be accessed for a
/// reason other than its permissions.
pub fn check_perms(rootfs: &Path) -> Result<()> {
    if find_restrictive(rootfs)?.is_some() {
        for line in RESTRICTIVE_PERMS_WARNINGS {
            tracing::warn!("{line}");
        }
    }
    Ok(())
}

/// Returns the first entry under `rootfs` with restrictive permissions.
///
/// # Errors
///
/// Returns [`OcirootfsError::Walk`] on access failures that are not
/// permission errors.
pub fn find_restrictive(rootfs: &Path) -> Result<Option<PathBuf>> {
    match walk(rootfs, scan_entry) {
        WalkOutcome::Completed => Ok(None),
        WalkOutcome::Violation(path) => Ok(Some(path)),
        WalkOutcome::Failed(e) => Err(e),
    }
}

fn scan_entry(path: &Path, entry: io::Result<Metadata>) -> Step<OcirootfsError> {
    match entry {
        // Being unable to look at an entry at all is itself a restrictive permission.
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::debug!(path = %path.display(), "path has restrictive permissions");
            Step::Violation
        }
        Err(e) => Step::Fail(OcirootfsError::Walk {
            path: path.to_path_buf(),
            source: e,
        }),
        Ok(meta) if meta.is_dir() && meta.permissions().mode() & OWNER_RWX != OWNER_RWX => {
            tracing::debug!(path = %path.display(), "path has restrictive permissions");
            Step::Violation
        }
        Ok(_) => Step::Continue,
    }
}

/// Gives the owner `rwX` on every entry under `rootfs`.
///
/// Directories gain `u+rwx`, other non-symlink entries gain `u+rw`; execute
/// bits on files are left as they are. A directory that could not be listed
/// before its mode was fixed is walked again afterwards, so unreadable
/// subtrees are repaired too. Changes already applied are kept if a later
/// entry fails.
///
/// # Errors
///
/// Returns [`OcirootfsError::FixPerms`] for the first entry that cannot be
/// inspected or modified.
pub fn fix_perms(rootfs: &Path) -> Result<()> {
    tracing::debug!(path = %rootfs.display(), "modifying permissions for file/directory owners");
    // The walk lists the root before visiting it, so the root goes first.
    if let Step::Fail(e) = fix_entry(rootfs, fs::symlink_metadata(rootfs)) {
        return Err(e);
    }
    fix_tree(rootfs)
}

fn fix_tree(root: &Path) -> Result<()> {
    let outcome = walk(root, |path, entry| match entry {
        Err(e) if path != root && is_unlisted_dir(path, &e) => match fix_tree(path) {
            Ok(()) => Step::Continue,
            Err(e) => Step::Fail(e),
        },
        entry => fix_entry(path, entry),
    });
    match outcome {
        WalkOutcome::Completed | WalkOutcome::Violation(_) => Ok(()),
        WalkOutcome::Failed(e) => Err(e),
    }
}

/// A listing refused for a directory that `fix_entry` has since opened up.
fn is_unlisted_dir(path: &Path, err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
        && fs::symlink_metadata(path).is_ok_and(|meta| {
            meta.is_dir() && meta.permissions().mode() & OWNER_RWX == OWNER_RWX
        })
}

fn fix_entry(path: &Path, entry: io::Result<Metadata>) -> Step<OcirootfsError> {
    let meta = match entry {
        Ok(meta) => meta,
        Err(source) => {
            return Step::Fail(OcirootfsError::FixPerms {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if meta.file_type().is_symlink() {
        return Step::Continue;
    }

    let mode = meta.permissions().mode() & 0o7777;
    let wanted = if meta.is_dir() {
        mode | OWNER_RWX
    } else {
        mode | OWNER_RW
    };
    if wanted == mode {
        return Step::Continue;
    }

    match fs::set_permissions(path, Permissions::from_mode(wanted)) {
        Ok(()) => Step::Continue,
        Err(source) => Step::Fail(OcirootfsError::FixPerms {
            path: path.to_path_buf(),
            source,
        }),
    }
}
