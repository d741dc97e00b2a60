//! Shared fixtures for provisioning BDD scenarios.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use gantry::test_support::{ScriptedCompute, ScriptedTransport};
use gantry::{
    Backoff, ProvisionError, ProvisionRequest, ProvisionRequestBuilder, Provisioned,
    ReadinessWaiter, RetryPolicy,
};
use rstest::fixture;
use tempfile::TempDir;

/// Scripted collaborators and the outcome of the `when` step.
pub struct ProvisioningContext {
    pub workspace: TempDir,
    pub request: Mutex<ProvisionRequestBuilder>,
    pub compute: Mutex<ScriptedCompute>,
    pub transport: Mutex<ScriptedTransport>,
    pub outcome: Mutex<Option<Result<Provisioned, ProvisionError>>>,
}

impl ProvisioningContext {
    pub fn workdir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.workspace.path().join("box-1"))
            .unwrap_or_else(|path| panic!("temp path is not UTF-8: {}", path.display()))
    }

    pub fn update_request(&self, change: impl FnOnce(ProvisionRequestBuilder) -> ProvisionRequestBuilder) {
        let mut guard = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = change(guard.clone());
    }

    pub fn update_compute(&self, change: impl FnOnce(ScriptedCompute) -> ScriptedCompute) {
        let mut guard = self.compute.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = change(guard.clone());
    }

    pub fn set_transport(&self, transport: ScriptedTransport) {
        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = transport;
    }

    pub fn compute(&self) -> ScriptedCompute {
        self.compute
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn transport(&self) -> ScriptedTransport {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request(&self) -> ProvisionRequest {
        self.request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .build()
            .unwrap_or_else(|err| panic!("scenario request should build: {err}"))
    }

    pub fn record(&self, outcome: Result<Provisioned, ProvisionError>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    pub fn outcome(&self) -> Option<Result<Provisioned, ProvisionError>> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Readiness waiter with every delay removed.
pub fn instant_waiter() -> ReadinessWaiter {
    let instant = |policy: RetryPolicy| {
        policy
            .with_initial_delay(Duration::ZERO)
            .with_backoff(Backoff::Fixed(Duration::ZERO))
            .with_attempt_timeout(Some(Duration::from_millis(20)))
    };
    ReadinessWaiter::new()
        .with_status_policy(instant(RetryPolicy::status_polling()))
        .with_probe_policy(instant(RetryPolicy::readiness_probe()))
}

#[fixture]
pub fn provisioning_context() -> ProvisioningContext {
    let workspace = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let context = ProvisioningContext {
        workspace,
        request: Mutex::new(ProvisionRequest::builder()),
        compute: Mutex::new(ScriptedCompute::new()),
        transport: Mutex::new(ScriptedTransport::default()),
        outcome: Mutex::new(None),
    };
    let workdir = context.workdir();
    context.update_request(|builder| {
        builder
            .name("box-1")
            .project("acme")
            .zone("europe-west1-b")
            .machine_type("e2-standard-4")
            .disk_size("40")
            .disk_image("projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts")
            .login_user("gantry")
            .workdir(workdir)
    });
    context
}
