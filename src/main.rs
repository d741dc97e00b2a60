//! Binary entry point for the Gantry CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use gantry::auth::{GcloudCliToken, StaticToken, TokenSource};
use gantry::compute::{ComputeError, GceClient, ResourceStatus};
use gantry::config::{ConfigError, ProviderConfig};
use gantry::descriptor::ConnectivityConfigurer;
use gantry::provision::{ProvisionError, ProvisionOrchestrator};
use gantry::readiness::ProbeOutcome;
use gantry::runner::{CommandError, CommandRunner};
use gantry::transport::SshTransport;
use gantry::logging;

mod cli;

use cli::{Cli, CommandArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Provision(#[from] ProvisionError),
    #[error("{0}")]
    Compute(#[from] ComputeError),
    #[error("remote command failed: {0}")]
    Command(#[from] CommandError),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(String),
    #[error("no command given: pass --command, set COMMAND, or list the words after --")]
    MissingCommand,
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping after the current step");
            trigger.cancel();
        }
    });

    let exit_code = match dispatch(cli, &cancel).await {
        Ok(code) => code,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

/// Subcommands that act on the instance through the control plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Init,
    Create,
    Start,
    Stop,
    Delete,
    Status,
}

impl TryFrom<Cli> for Lifecycle {
    type Error = CommandArgs;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        match cli {
            Cli::Init => Ok(Self::Init),
            Cli::Create => Ok(Self::Create),
            Cli::Start => Ok(Self::Start),
            Cli::Stop => Ok(Self::Stop),
            Cli::Delete => Ok(Self::Delete),
            Cli::Status => Ok(Self::Status),
            Cli::Command(args) => Err(args),
        }
    }
}

async fn dispatch(cli: Cli, cancel: &CancellationToken) -> Result<i32, CliError> {
    let config = ProviderConfig::load_without_cli_args()?;
    match Lifecycle::try_from(cli) {
        Ok(verb) => {
            manage_instance(&config, verb, cancel).await?;
            Ok(0)
        }
        Err(args) => run_command(&config, &args, cancel).await,
    }
}

async fn run_command(
    config: &ProviderConfig,
    args: &CommandArgs,
    cancel: &CancellationToken,
) -> Result<i32, CliError> {
    let command = resolve_command(args)?;
    let request = config.as_request()?;
    let runner = CommandRunner::new(SshTransport::new(config.ssh_bin.as_str()));
    let exit = runner
        .execute_in(request.workdir(), &command, cancel)
        .await?;
    exit.code.ok_or(CliError::MissingExitCode)
}

async fn manage_instance(
    config: &ProviderConfig,
    verb: Lifecycle,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let request = config.as_request()?;
    let orchestrator = ProvisionOrchestrator::new(
        GceClient::new(config.project.as_str(), token_source(config))?,
        SshTransport::new(config.ssh_bin.as_str()),
    )
    .with_configurer(ConnectivityConfigurer::new(config.gcloud_bin.as_str()))
    .with_waiter(config.readiness_waiter());

    match verb {
        Lifecycle::Init => {
            orchestrator.verify_access(&request, cancel).await?;
        }
        Lifecycle::Create => {
            let provisioned = orchestrator.create(&request, cancel).await?;
            report_probe(provisioned.ready.probe);
        }
        Lifecycle::Start => {
            let ready = orchestrator.start(&request, cancel).await?;
            report_probe(ready.probe);
        }
        Lifecycle::Stop => orchestrator.stop(&request, cancel).await?,
        Lifecycle::Delete => orchestrator.delete(&request, cancel).await?,
        Lifecycle::Status => {
            let status = orchestrator.status(&request, cancel).await?;
            writeln!(io::stdout(), "{}", status_label(&status)?)?;
        }
    }
    Ok(())
}

fn token_source(config: &ProviderConfig) -> Arc<dyn TokenSource> {
    match config.access_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Arc::new(StaticToken::new(token)),
        _ => Arc::new(GcloudCliToken::new(config.gcloud_bin.as_str())),
    }
}

fn report_probe(outcome: ProbeOutcome) {
    if let ProbeOutcome::Degraded { attempts } = outcome {
        warn!(attempts, "instance created but SSH did not answer yet");
    }
}

fn status_label(status: &ResourceStatus) -> Result<&'static str, CliError> {
    match status {
        ResourceStatus::Running => Ok("Running"),
        ResourceStatus::Provisioning | ResourceStatus::Stopping => Ok("Busy"),
        ResourceStatus::Stopped => Ok("Stopped"),
        ResourceStatus::NotFound => Ok("NotFound"),
        ResourceStatus::Unknown(raw) => Err(CliError::UnexpectedStatus(raw.clone())),
    }
}

fn resolve_command(args: &CommandArgs) -> Result<String, CliError> {
    if !args.args.is_empty() {
        validate_command_args(&args.args)?;
        return Ok(render_remote_command(&args.args));
    }
    args.command
        .as_deref()
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_owned)
        .ok_or(CliError::MissingCommand)
}

fn render_remote_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    if args.iter().any(|arg| arg.chars().any(char::is_control)) {
        return Err(CliError::InvalidCommand(String::from(
            "command arguments must not contain control characters (e.g. newline, tab, NUL)",
        )));
    }
    Ok(())
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
