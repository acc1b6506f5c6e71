//! `ocirootfs check-perms` — Warn about restrictive permissions in a rootfs.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

/// Arguments for the `check-perms` command.
#[derive(Args, Debug)]
pub struct CheckPermsArgs {
    /// Rootfs directory to scan.
    pub rootfs: PathBuf,
}

/// Executes the `check-perms` command.
///
/// # Errors
///
/// Returns an error if the rootfs cannot be walked.
pub fn execute(args: &CheckPermsArgs) -> anyhow::Result<()> {
    tracing::debug!(rootfs = %args.rootfs.display(), "scanning for restrictive permissions");
    ocirootfs_image::check_perms(&args.rootfs)
        .with_context(|| format!("checking permissions under {}", args.rootfs.display()))
}
