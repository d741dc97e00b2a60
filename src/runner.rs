//! Runs one remote command over a configured channel.
//!
//! Direct channels get a single attempt. Proxied channels retry transport
//! failures (the client could not start, or `ssh` exited 255) with the
//! command execution policy's linear backoff. Remote exit codes are never
//! retried and are returned unchanged.

use camino::Utf8Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::descriptor::{ConnectivityConfigurer, ConnectivityDescriptor, DescriptorError};
use crate::request::ConnectivityMode;
use crate::retry::{RetryPolicy, pause};
use crate::transport::{ChannelExit, ChannelRequest, ChannelTransport, TransportError};

/// Errors raised while running a remote command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when every proxied attempt failed at the transport level.
    #[error("command channel failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Text of the final failure.
        last_error: String,
    },
    /// Raised when the single direct attempt could not run.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Raised when the descriptor cannot be loaded.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// Raised when cancelled between attempts.
    #[error("command cancelled")]
    Cancelled,
}

/// Executes remote commands through a [`ChannelTransport`].
#[derive(Clone, Debug)]
pub struct CommandRunner<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: ChannelTransport> CommandRunner<T> {
    /// Uses `transport` with the default command execution policy.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::command_execution(),
        }
    }

    /// Overrides the retry policy used for proxied channels.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs `command` on the instance described by `descriptor`, sharing the
    /// caller's stdio.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::RetriesExhausted`] when every proxied attempt
    /// failed at the transport level, [`CommandError::Transport`] when the
    /// direct attempt could not run, and [`CommandError::Cancelled`] when
    /// cancelled between attempts.
    pub async fn execute(
        &self,
        descriptor: &ConnectivityDescriptor,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelExit, CommandError> {
        let request = ChannelRequest::interactive(descriptor, command);
        if descriptor.mode() == ConnectivityMode::Direct {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled);
            }
            return Ok(self.transport.execute(request).await?);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled);
            }
            attempt += 1;
            debug!(attempt, max_attempts, host = descriptor.host_name(), "running remote command");
            let last_error = match self.transport.execute(request).await {
                Ok(exit) if !exit.is_transport_failure() => return Ok(exit),
                Ok(exit) => format!(
                    "ssh exited with status {}",
                    exit.code.map_or_else(|| String::from("unknown"), |code| code.to_string())
                ),
                Err(err) => err.to_string(),
            };
            if attempt >= max_attempts {
                return Err(CommandError::RetriesExhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            let delay = self.policy.delay_after(attempt);
            warn!(
                attempt,
                max_attempts,
                error = %last_error,
                retry_in = ?delay,
                "command channel failed; retrying"
            );
            pause(delay, cancel)
                .await
                .map_err(|_| CommandError::Cancelled)?;
        }
    }

    /// Loads the descriptor stored in `workdir` and runs `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Descriptor`] when no usable descriptor exists,
    /// plus every error of [`Self::execute`].
    pub async fn execute_in(
        &self,
        workdir: &Utf8Path,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelExit, CommandError> {
        let descriptor = ConnectivityConfigurer::load(workdir)?;
        self.execute(&descriptor, command, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::descriptor::{ChannelHealth, TransportParams};
    use crate::retry::Backoff;
    use crate::test_support::{ScriptedTransport, TransportStep};
    use camino::Utf8PathBuf;
    use rstest::rstest;

    fn descriptor(mode: ConnectivityMode) -> ConnectivityDescriptor {
        let transport = match mode {
            ConnectivityMode::Direct => TransportParams::Direct {
                address: String::from("203.0.113.7"),
                port: 22,
            },
            ConnectivityMode::Proxied => TransportParams::Proxied {
                host: String::from("box-1"),
                port: 22,
                proxy_command: String::from("gcloud compute start-iap-tunnel %h %p"),
            },
        };
        ConnectivityDescriptor {
            host_alias: String::from("box-1"),
            user: String::from("gantry"),
            identity_file: Utf8PathBuf::from("/work/id"),
            transport,
            health: ChannelHealth::default(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::command_execution().with_backoff(Backoff::Linear {
            step: Duration::from_micros(1),
            cap: Duration::from_micros(5),
        })
    }

    #[tokio::test]
    async fn proxied_retries_transport_failures_then_succeeds() {
        let transport = ScriptedTransport::new([TransportStep::exit(255), TransportStep::exit(0)]);
        let runner = CommandRunner::new(transport).with_policy(fast_policy());

        let exit = runner
            .execute(&descriptor(ConnectivityMode::Proxied), "make test", &CancellationToken::new())
            .await
            .expect("second attempt succeeds");

        assert!(exit.is_success());
        assert_eq!(runner.transport().calls(), 2);
        assert_eq!(runner.transport().commands(), vec!["make test", "make test"]);
    }

    #[tokio::test]
    async fn proxied_exhaustion_reports_attempts_and_last_error() {
        let transport = ScriptedTransport::new([
            TransportStep::exit(255),
            TransportStep::spawn_failure("no such file"),
            TransportStep::spawn_failure("still missing"),
        ]);
        let runner = CommandRunner::new(transport).with_policy(fast_policy());

        let err = runner
            .execute(&descriptor(ConnectivityMode::Proxied), "true", &CancellationToken::new())
            .await
            .expect_err("all attempts fail");

        assert_eq!(
            err,
            CommandError::RetriesExhausted {
                attempts: 3,
                last_error: String::from("failed to spawn ssh: still missing"),
            }
        );
    }

    #[rstest]
    #[case(ConnectivityMode::Direct)]
    #[case(ConnectivityMode::Proxied)]
    #[tokio::test]
    async fn remote_exit_codes_pass_through_without_retry(#[case] mode: ConnectivityMode) {
        let transport = ScriptedTransport::new([TransportStep::exit(3)]);
        let runner = CommandRunner::new(transport).with_policy(fast_policy());

        let exit = runner
            .execute(&descriptor(mode), "false", &CancellationToken::new())
            .await
            .expect("exit code returned");

        assert_eq!(exit.code, Some(3));
        assert_eq!(runner.transport().calls(), 1);
    }

    #[tokio::test]
    async fn direct_mode_makes_a_single_attempt() {
        let transport = ScriptedTransport::new([TransportStep::exit(255), TransportStep::exit(0)]);
        let runner = CommandRunner::new(transport).with_policy(fast_policy());

        let exit = runner
            .execute(&descriptor(ConnectivityMode::Direct), "true", &CancellationToken::new())
            .await
            .expect("exit returned");

        assert_eq!(exit.code, Some(255));
        assert_eq!(runner.transport().calls(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_attempt() {
        let transport = ScriptedTransport::new([TransportStep::exit(255), TransportStep::exit(0)]);
        let runner = CommandRunner::new(transport).with_policy(
            RetryPolicy::command_execution().with_backoff(Backoff::Fixed(Duration::from_secs(3600))),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = runner
            .execute(&descriptor(ConnectivityMode::Proxied), "true", &cancel)
            .await
            .expect_err("cancelled");

        assert_eq!(err, CommandError::Cancelled);
        assert_eq!(runner.transport().calls(), 1);
    }
}
