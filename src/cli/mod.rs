//! Command-line interface definitions for the `volsnap` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `volsnap` binary.
#[derive(Debug, Parser)]
#[command(
    name = "volsnap",
    about = "Manage cloud block volumes, snapshots and backups for this host",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Show backend defaults and the host instance identity.
    #[command(name = "info", about = "Show backend defaults and the host instance identity")]
    Info(Target),
    /// Run one backend operation by executor hint.
    #[command(name = "exec", about = "Run one backend operation by executor hint")]
    Exec(ExecCommand),
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct Target {
    /// Override the metadata root directory for this invocation.
    #[arg(long, value_name = "DIR")]
    pub(crate) root: Option<String>,
}

/// Arguments for the `volsnap exec` subcommand.
#[derive(Debug, Args)]
pub(crate) struct ExecCommand {
    /// Executor hint, for example `ebs.volume.create.executor`.
    #[arg(value_name = "HINT")]
    pub(crate) hint: String,
    /// Name of the volume or snapshot the operation targets.
    #[arg(value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Operation option as `KEY=VALUE`; may be repeated.
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub(crate) options: Vec<(String, String)>,
    #[command(flatten)]
    pub(crate) target: Target,
}

/// Splits `KEY=VALUE` at the first `=`.
pub(crate) fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
