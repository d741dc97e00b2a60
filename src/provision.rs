//! Orchestrates the full provisioning flow and the lifecycle verbs.
//!
//! `create` runs preflight, key setup, spec construction, creation, and the
//! readiness phases in that order. Proxied preflight always completes before
//! anything is created, so a missing NAT leaves no resources behind.
//!
//! Every control-plane call is raced against the caller's cancellation
//! token, and a token cancelled before a mutation stops it from being sent.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::compute::{ComputeApi, ComputeError, ResourceStatus, fetch_status};
use crate::descriptor::ConnectivityConfigurer;
use crate::instance_spec::{InstanceSpecBuilder, SpecError};
use crate::keys::{self, KeyError};
use crate::preflight::{NetworkPreflight, PreflightError, PreflightReport};
use crate::readiness::{ReadinessError, ReadinessWaiter, ReadyInstance};
use crate::request::{ProvisionRequest, RequestError};
use crate::transport::ChannelTransport;

/// Errors surfaced by [`ProvisionOrchestrator`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when the request is invalid.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Raised when network preflight fails.
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    /// Raised when the key pair cannot be prepared.
    #[error(transparent)]
    Keys(#[from] KeyError),
    /// Raised when the insert body cannot be built.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Raised when a control-plane call fails.
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// Raised when the instance does not become ready.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// Raised when the caller cancels before a control-plane call completes.
    #[error("provisioning cancelled")]
    Cancelled,
}

/// Outcome of a successful `create`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned {
    /// Network findings gathered before creation.
    pub preflight: PreflightReport,
    /// Running instance, its descriptor, and the probe result.
    pub ready: ReadyInstance,
}

/// Wires a control plane and a channel transport into the provisioning flow.
#[derive(Clone, Debug)]
pub struct ProvisionOrchestrator<C, T> {
    api: C,
    transport: T,
    configurer: ConnectivityConfigurer,
    waiter: ReadinessWaiter,
}

impl<C: ComputeApi, T: ChannelTransport> ProvisionOrchestrator<C, T> {
    /// Uses default configurer and readiness settings.
    #[must_use]
    pub fn new(api: C, transport: T) -> Self {
        Self {
            api,
            transport,
            configurer: ConnectivityConfigurer::default(),
            waiter: ReadinessWaiter::new(),
        }
    }

    /// Overrides the descriptor configurer.
    #[must_use]
    pub fn with_configurer(mut self, configurer: ConnectivityConfigurer) -> Self {
        self.configurer = configurer;
        self
    }

    /// Overrides the readiness waiter.
    #[must_use]
    pub const fn with_waiter(mut self, waiter: ReadinessWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Returns the control plane.
    #[must_use]
    pub const fn api(&self) -> &C {
        &self.api
    }

    /// Returns the channel transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Creates the instance and waits until its command channel is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when any step fails. A status timeout
    /// leaves the instance in place for inspection.
    pub async fn create(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<Provisioned, ProvisionError> {
        request.validate()?;
        let preflight = unless_cancelled(
            cancel,
            NetworkPreflight::new(&self.api, request.project.as_str(), &request.network)
                .run(request),
        )
        .await?;
        let key_pair = keys::ensure_key_pair(request.workdir())?;
        let spec = InstanceSpecBuilder::build(request, &key_pair.public_key)?;

        info!(
            instance = %request.name,
            zone = %request.zone,
            mode = ?request.mode(),
            machine_type = %request.machine_type,
            "creating instance"
        );
        unless_cancelled(cancel, self.api.insert_instance(&request.zone, &spec)).await?;

        let ready = self.wait_ready(request, cancel).await?;
        Ok(Provisioned { preflight, ready })
    }

    /// Starts a stopped instance and refreshes its descriptor once it runs.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the start call or readiness wait fails.
    pub async fn start(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, ProvisionError> {
        info!(instance = %request.name, "starting instance");
        unless_cancelled(cancel, self.api.start_instance(&request.zone, &request.name)).await?;
        self.wait_ready(request, cancel).await
    }

    /// Stops the instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when the call fails and
    /// [`ProvisionError::Cancelled`] when cancelled.
    pub async fn stop(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        info!(instance = %request.name, "stopping instance");
        unless_cancelled(cancel, self.api.stop_instance(&request.zone, &request.name)).await
    }

    /// Deletes the instance. The working directory is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when the call fails and
    /// [`ProvisionError::Cancelled`] when cancelled.
    pub async fn delete(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        info!(instance = %request.name, "deleting instance");
        unless_cancelled(cancel, self.api.delete_instance(&request.zone, &request.name)).await
    }

    /// Reports the instance status.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when the lookup fails.
    pub async fn status(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ResourceStatus, ProvisionError> {
        unless_cancelled(cancel, fetch_status(&self.api, &request.zone, &request.name)).await
    }

    /// Confirms the credentials can list instances in the request's zone.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when the listing fails.
    pub async fn verify_access(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<usize, ProvisionError> {
        let instances = unless_cancelled(cancel, self.api.list_instances(&request.zone)).await?;
        info!(zone = %request.zone, instances = instances.len(), "credentials verified");
        Ok(instances.len())
    }

    async fn wait_ready(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, ProvisionError> {
        let ready = self
            .waiter
            .await_ready(
                &self.api,
                &self.transport,
                &request.zone,
                &request.name,
                |instance| self.configurer.configure(request, instance),
                cancel,
            )
            .await?;
        Ok(ready)
    }
}

/// Drives `call` unless `cancel` fires first. A token that is already
/// cancelled means `call` is never polled, so nothing reaches the control
/// plane.
async fn unless_cancelled<T, E>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, ProvisionError>
where
    ProvisionError: From<E>,
{
    if cancel.is_cancelled() {
        return Err(ProvisionError::Cancelled);
    }
    tokio::select! {
        () = cancel.cancelled() => Err(ProvisionError::Cancelled),
        result = call => Ok(result?),
    }
}
