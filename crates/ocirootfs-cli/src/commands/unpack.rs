//! `ocirootfs unpack` — Unpack an OCI image layout into a rootfs directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use ocirootfs_common::config::UnpackerConfig;
use ocirootfs_common::types::{Bundle, Verbosity};
use ocirootfs_core::privilege::PrivilegeContext;
use ocirootfs_image::RootfsUnpacker;
use ocirootfs_image::source::LayoutImageSource;

/// Arguments for the `unpack` command.
#[allow(clippy::struct_excessive_bools)]
#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// OCI image layout directory holding the pulled image.
    pub layout: PathBuf,

    /// Destination rootfs directory. Existing content is deleted.
    #[arg(long)]
    pub rootfs: PathBuf,

    /// Tag of the manifest to unpack (required if the layout holds several).
    #[arg(long)]
    pub tag: Option<String>,

    /// Give the owner rwX on every entry after unpacking.
    #[arg(long)]
    pub fix_perms: bool,

    /// The rootfs is a sandbox; warn about entries `rm` cannot remove.
    #[arg(long)]
    pub sandbox: bool,

    /// Skip layer digest verification.
    #[arg(long)]
    pub no_verify: bool,

    /// JSON configuration file.
    #[arg(long, env = "OCIROOTFS_CONFIG")]
    pub config: Option<PathBuf>,
}

impl UnpackArgs {
    /// Loads the config file (if any) and applies the command-line overrides.
    fn config(&self, verbosity: Verbosity) -> anyhow::Result<UnpackerConfig> {
        let mut config = match &self.config {
            Some(path) => UnpackerConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => UnpackerConfig::default(),
        };
        if verbosity != Verbosity::Normal {
            config.verbosity = verbosity;
        }
        config.build.fix_perms |= self.fix_perms;
        config.build.sandbox_target |= self.sandbox;
        if self.no_verify {
            config.verify_digests = false;
        }
        Ok(config)
    }
}

/// Executes the `unpack` command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or any stage of
/// the unpack pipeline fails.
pub fn execute(args: UnpackArgs, verbosity: Verbosity) -> anyhow::Result<()> {
    let config = args.config(verbosity)?;
    let bundle = Bundle::new(&args.layout, &args.rootfs).with_options(config.build);
    let source = LayoutImageSource::new(&args.layout, args.tag.clone());
    let sys_ctx = config.system.clone();

    tracing::info!(
        layout = %args.layout.display(),
        rootfs = %args.rootfs.display(),
        "unpacking image"
    );
    RootfsUnpacker::new(PrivilegeContext::detect(), config)
        .unpack(&bundle, &source, &sys_ctx)
        .with_context(|| {
            format!(
                "unpacking {} into {}",
                args.layout.display(),
                args.rootfs.display()
            )
        })?;

    #[allow(clippy::print_stdout)]
    {
        println!("Unpacked rootfs to {}", args.rootfs.display());
    }
    Ok(())
}
