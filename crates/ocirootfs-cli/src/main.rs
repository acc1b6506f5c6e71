//! # ocirootfs
//!
//! Unpacks an OCI image layout into a root filesystem bundle, rootless
//! when needed, and checks or repairs the resulting permissions.

mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = cli.verbosity().max_level();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(level).into())
                .from_env_lossy(),
        )
        .init();

    commands::execute(cli)
}
