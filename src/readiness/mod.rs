//! Waits for a new instance to become usable over its command channel.
//!
//! Readiness has two phases with independent budgets. The status phase polls
//! the control plane until the instance reports `Running`. The caller's
//! configure step then builds the connectivity descriptor, and the probe
//! phase runs `echo ready` through the channel until it answers. By default
//! an unanswered probe only degrades the outcome, because the bootstrap
//! script may still be installing keys when the budget runs out.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compute::{ComputeApi, ComputeError, InstanceResource, ResourceStatus};
use crate::descriptor::{ConnectivityDescriptor, DescriptorError};
use crate::retry::{RetryPolicy, pause};
use crate::transport::{ChannelExit, ChannelRequest, ChannelTransport};

/// Command used to probe the channel.
pub const PROBE_COMMAND: &str = "echo ready";

/// Connect timeout handed to the client for every probe. The policy's
/// attempt timeout bounds the whole invocation and must exceed it.
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do when the probe budget runs out.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProbeTimeoutPolicy {
    /// Log a warning and report a degraded outcome.
    #[default]
    Degrade,
    /// Fail with [`ReadinessError::ProbeTimeout`].
    Fail,
}

/// What to do when the instance reports stopping or stopped mid-wait.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StoppedPolicy {
    /// Keep polling until the status budget runs out.
    #[default]
    KeepPolling,
    /// Fail with [`ReadinessError::StoppedDuringWait`].
    FailFast,
}

/// Result of the probe phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    /// The channel answered.
    Ready {
        /// Probes run, including the successful one.
        attempts: u32,
    },
    /// The channel never answered; later commands may still succeed.
    Degraded {
        /// Probes run.
        attempts: u32,
    },
}

impl ProbeOutcome {
    /// Returns whether the channel answered.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Instance that reached `Running` and had its channel probed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadyInstance {
    /// Last observed instance resource.
    pub instance: InstanceResource,
    /// Descriptor produced by the configure step.
    pub descriptor: ConnectivityDescriptor,
    /// Probe phase result.
    pub probe: ProbeOutcome,
}

/// Errors raised while waiting for readiness.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReadinessError {
    /// Raised when the instance never reported `Running`.
    #[error("instance {instance} was not running after {attempts} status checks (last status: {last_status})")]
    StatusTimeout {
        /// Instance name.
        instance: String,
        /// Status checks made.
        attempts: u32,
        /// Last observed status.
        last_status: String,
    },
    /// Raised under [`StoppedPolicy::FailFast`].
    #[error("instance {instance} reported {status} while waiting for it to run")]
    StoppedDuringWait {
        /// Instance name.
        instance: String,
        /// Observed status.
        status: String,
    },
    /// Raised under [`ProbeTimeoutPolicy::Fail`].
    #[error("instance {instance} did not answer on its command channel after {attempts} probes")]
    ProbeTimeout {
        /// Instance name.
        instance: String,
        /// Probes run.
        attempts: u32,
    },
    /// Raised when a status check fails.
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// Raised when the configure step fails.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// Raised when the wait is cancelled.
    #[error("readiness wait cancelled")]
    Cancelled,
}

/// Drives the status and probe phases.
#[derive(Clone, Copy, Debug)]
pub struct ReadinessWaiter {
    status_policy: RetryPolicy,
    probe_policy: RetryPolicy,
    on_probe_timeout: ProbeTimeoutPolicy,
    on_stopped: StoppedPolicy,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessWaiter {
    /// Uses the default status and probe policies.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status_policy: RetryPolicy::status_polling(),
            probe_policy: RetryPolicy::readiness_probe(),
            on_probe_timeout: ProbeTimeoutPolicy::Degrade,
            on_stopped: StoppedPolicy::KeepPolling,
        }
    }

    /// Overrides the status polling policy.
    #[must_use]
    pub const fn with_status_policy(mut self, policy: RetryPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    /// Overrides the probe policy.
    #[must_use]
    pub const fn with_probe_policy(mut self, policy: RetryPolicy) -> Self {
        self.probe_policy = policy;
        self
    }

    /// Chooses what happens when the probe budget runs out.
    #[must_use]
    pub const fn with_probe_timeout(mut self, policy: ProbeTimeoutPolicy) -> Self {
        self.on_probe_timeout = policy;
        self
    }

    /// Chooses what happens when the instance halts mid-wait.
    #[must_use]
    pub const fn with_stopped_policy(mut self, policy: StoppedPolicy) -> Self {
        self.on_stopped = policy;
        self
    }

    /// Returns the worst-case duration of both phases combined.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        self.status_policy
            .worst_case()
            .saturating_add(self.probe_policy.worst_case())
    }

    /// Polls until `name` reports `Running` and returns the instance.
    ///
    /// Makes at most `max_attempts` status checks. An absent, provisioning,
    /// or unrecognised status is retried, as is a halted one unless
    /// [`StoppedPolicy::FailFast`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::StatusTimeout`] once the budget is spent,
    /// [`ReadinessError::Compute`] when a status check fails, and
    /// [`ReadinessError::Cancelled`] when cancelled.
    pub async fn await_running<C>(
        &self,
        api: &C,
        zone: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<InstanceResource, ReadinessError>
    where
        C: ComputeApi + ?Sized,
    {
        let max_attempts = self.status_policy.max_attempts.max(1);
        let mut last_status = ResourceStatus::NotFound;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            let instance = api.get_instance(zone, name).await?;
            let status = ResourceStatus::of(instance.as_ref());
            debug!(instance = name, attempt, max_attempts, status = %status, "polled instance status");
            if let (ResourceStatus::Running, Some(running)) = (&status, instance) {
                info!(instance = name, attempt, "instance is running");
                return Ok(running);
            }
            if status.is_halted() && self.on_stopped == StoppedPolicy::FailFast {
                return Err(ReadinessError::StoppedDuringWait {
                    instance: name.to_owned(),
                    status: status.to_string(),
                });
            }
            last_status = status;
            if attempt < max_attempts {
                pause(self.status_policy.delay_after(attempt), cancel)
                    .await
                    .map_err(|_| ReadinessError::Cancelled)?;
            }
        }
        Err(ReadinessError::StatusTimeout {
            instance: name.to_owned(),
            attempts: max_attempts,
            last_status: last_status.to_string(),
        })
    }

    /// Probes the channel described by `descriptor`.
    ///
    /// Waits the policy's initial delay first, then runs [`PROBE_COMMAND`]
    /// up to `max_attempts` times. The client connects with
    /// [`PROBE_CONNECT_TIMEOUT`] and each invocation as a whole is bounded by
    /// the policy's attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::ProbeTimeout`] only under
    /// [`ProbeTimeoutPolicy::Fail`], and [`ReadinessError::Cancelled`] when
    /// cancelled.
    pub async fn probe<T>(
        &self,
        transport: &T,
        descriptor: &ConnectivityDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ReadinessError>
    where
        T: ChannelTransport + ?Sized,
    {
        let policy = self.probe_policy;
        let max_attempts = policy.max_attempts.max(1);

        debug!(delay = ?policy.initial_delay, "waiting before first channel probe");
        pause(policy.initial_delay, cancel)
            .await
            .map_err(|_| ReadinessError::Cancelled)?;

        for attempt in 1..=max_attempts {
            let request = ChannelRequest::probe(descriptor, PROBE_COMMAND, PROBE_CONNECT_TIMEOUT);
            let answered = tokio::select! {
                () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                outcome = run_probe(transport, request, policy.attempt_timeout) => outcome,
            };
            if answered {
                info!(host = descriptor.host_name(), attempt, "command channel is ready");
                return Ok(ProbeOutcome::Ready { attempts: attempt });
            }
            debug!(host = descriptor.host_name(), attempt, max_attempts, "channel probe failed");
            if attempt < max_attempts {
                pause(policy.delay_after(attempt), cancel)
                    .await
                    .map_err(|_| ReadinessError::Cancelled)?;
            }
        }

        match self.on_probe_timeout {
            ProbeTimeoutPolicy::Degrade => {
                warn!(
                    host = descriptor.host_name(),
                    attempts = max_attempts,
                    "command channel did not answer; continuing, later commands may fail until bootstrap finishes"
                );
                Ok(ProbeOutcome::Degraded {
                    attempts: max_attempts,
                })
            }
            ProbeTimeoutPolicy::Fail => Err(ReadinessError::ProbeTimeout {
                instance: descriptor.host_alias.clone(),
                attempts: max_attempts,
            }),
        }
    }

    /// Runs both phases for `name`.
    ///
    /// `configure` receives the running instance and must return the
    /// descriptor to probe; it is never called before `Running` is observed.
    ///
    /// # Errors
    ///
    /// Returns every error of [`Self::await_running`] and [`Self::probe`],
    /// plus [`ReadinessError::Descriptor`] when `configure` fails.
    pub async fn await_ready<C, T, F>(
        &self,
        api: &C,
        transport: &T,
        zone: &str,
        name: &str,
        configure: F,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, ReadinessError>
    where
        C: ComputeApi + ?Sized,
        T: ChannelTransport + ?Sized,
        F: FnOnce(&InstanceResource) -> Result<ConnectivityDescriptor, DescriptorError>,
    {
        let instance = self.await_running(api, zone, name, cancel).await?;
        let descriptor = configure(&instance)?;
        let probe = self.probe(transport, &descriptor, cancel).await?;
        Ok(ReadyInstance {
            instance,
            descriptor,
            probe,
        })
    }
}

async fn run_probe<T>(transport: &T, request: ChannelRequest<'_>, timeout: Option<Duration>) -> bool
where
    T: ChannelTransport + ?Sized,
{
    let succeeded = |result: Result<ChannelExit, _>| result.is_ok_and(ChannelExit::is_success);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, transport.execute(request))
            .await
            .is_ok_and(succeeded),
        None => succeeded(transport.execute(request).await),
    }
}
