//! CLI command definitions and dispatch.

pub mod check_perms;
pub mod unpack;

use clap::{Args, Parser, Subcommand};
use ocirootfs_common::types::Verbosity;

/// ocirootfs — OCI image to rootfs materialization.
#[derive(Parser, Debug)]
#[command(name = "ocirootfs", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Output verbosity.
    #[command(flatten)]
    pub verbosity: VerbosityArgs,
}

impl Cli {
    /// Verbosity selected on the command line.
    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity.resolve()
    }
}

/// Mutually exclusive verbosity flags.
#[allow(clippy::struct_excessive_bools)]
#[derive(Args, Debug, Default)]
pub struct VerbosityArgs {
    /// Only print errors.
    #[arg(short, long, global = true, conflicts_with_all = ["quiet", "verbose", "debug"])]
    pub silent: bool,
    /// Only print errors and warnings.
    #[arg(short, long, global = true, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,
    /// Print additional progress information.
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub verbose: bool,
    /// Print debugging information, including every extracted entry.
    #[arg(short, long, global = true)]
    pub debug: bool,
}

impl VerbosityArgs {
    /// Collapses the flags into a [`Verbosity`].
    pub const fn resolve(&self) -> Verbosity {
        if self.silent {
            Verbosity::Silent
        } else if self.quiet {
            Verbosity::Quiet
        } else if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Unpack an OCI image layout into a rootfs directory.
    Unpack(unpack::UnpackArgs),
    /// Warn about directories in a rootfs that the owner cannot remove.
    CheckPerms(check_perms::CheckPermsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let verbosity = cli.verbosity();
    match cli.command {
        Command::Unpack(args) => unpack::execute(args, verbosity),
        Command::CheckPerms(args) => check_perms::execute(&args),
    }
}
