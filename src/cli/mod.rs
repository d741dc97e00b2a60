//! Command-line interface definitions for the `gantry` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `gantry` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gantry",
    about = "Provision Compute Engine instances and run commands over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Check that the configured credentials can reach the project.
    #[command(name = "init", about = "Check credentials against the configured zone")]
    Init,
    /// Create the instance and wait until SSH is usable.
    #[command(name = "create", about = "Create the instance and wait until SSH is usable")]
    Create,
    /// Run a command on the instance.
    #[command(name = "command", about = "Run a command on the instance over SSH")]
    Command(CommandArgs),
    /// Start a stopped instance.
    #[command(name = "start", about = "Start the instance and wait until SSH is usable")]
    Start,
    /// Stop the instance.
    #[command(name = "stop", about = "Stop the instance")]
    Stop,
    /// Delete the instance.
    #[command(name = "delete", about = "Delete the instance")]
    Delete,
    /// Print the instance status.
    #[command(name = "status", about = "Print Running, Busy, Stopped, or NotFound")]
    Status,
}

/// Arguments for the `gantry command` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CommandArgs {
    /// Command line to run remotely, passed to the remote shell verbatim.
    #[arg(long, env = "COMMAND", value_name = "COMMAND", conflicts_with = "args")]
    pub(crate) command: Option<String>,
    /// Command words to run remotely, each shell-quoted (use -- to separate
    /// flags).
    #[arg(trailing_var_arg = true, value_name = "ARGS")]
    pub(crate) args: Vec<String>,
}
