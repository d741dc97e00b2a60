//! BDD step definitions for provisioning scenarios.

use gantry::compute::InstanceResource;
use gantry::descriptor::TransportParams;
use gantry::instance_spec::bootstrap::STARTUP_SCRIPT_KEY;
use gantry::preflight::FindingStatus;
use gantry::test_support::{
    ScriptedTransport, StatusStep, TransportStep, iap_firewall_rule, router_with_nat_for,
};
use gantry::{
    ConnectivityDescriptor, PreflightError, ProbeOutcome, ProvisionError, ProvisionOrchestrator,
    Provisioned, ReadinessError,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{ProvisioningContext, instant_waiter};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn fail(message: impl Into<String>) -> StepError {
    StepError::Assertion(message.into())
}

fn provisioned(context: &ProvisioningContext) -> Result<Provisioned, StepError> {
    match context.outcome() {
        Some(Ok(provisioned)) => Ok(provisioned),
        Some(Err(err)) => Err(fail(format!("expected success, got: {err}"))),
        None => Err(fail("the create step has not run")),
    }
}

fn failure(context: &ProvisioningContext) -> Result<ProvisionError, StepError> {
    match context.outcome() {
        Some(Err(err)) => Ok(err),
        Some(Ok(_)) => Err(fail("expected failure, got success")),
        None => Err(fail("the create step has not run")),
    }
}

fn created_spec(context: &ProvisioningContext) -> Result<InstanceResource, StepError> {
    context
        .compute()
        .inserted()
        .into_iter()
        .next()
        .ok_or_else(|| fail("no instance was created"))
}

fn descriptor(context: &ProvisioningContext) -> Result<ConnectivityDescriptor, StepError> {
    provisioned(context).map(|outcome| outcome.ready.descriptor)
}

#[given("a request with a public address")]
fn public_request(provisioning_context: &ProvisioningContext) {
    provisioning_context.update_request(|builder| builder.public_ip(true));
    provisioning_context.update_compute(|compute| compute.with_external_address("203.0.113.7"));
}

#[given("a request without a public address on subnetwork \"{subnetwork}\"")]
fn private_request(provisioning_context: &ProvisioningContext, subnetwork: String) {
    provisioning_context.update_request(|builder| builder.public_ip(false).subnetwork(subnetwork));
}

#[given("the region has Cloud NAT covering \"{subnet}\"")]
fn nat_present(provisioning_context: &ProvisioningContext, subnet: String) {
    provisioning_context.update_compute(|compute| compute.with_routers(vec![router_with_nat_for(&subnet)]));
}

#[given("an IAP firewall rule exists")]
fn firewall_present(provisioning_context: &ProvisioningContext) {
    provisioning_context.update_compute(|compute| compute.with_firewalls(vec![iap_firewall_rule()]));
}

#[given("the instance runs after {checks} status checks")]
fn runs_after(provisioning_context: &ProvisioningContext, checks: u32) {
    let pending = (1..checks).map(|_| StatusStep::Status("PROVISIONING"));
    let steps: Vec<StatusStep> = pending.chain([StatusStep::Status("RUNNING")]).collect();
    provisioning_context.update_compute(|compute| compute.with_statuses(steps));
}

#[given("the instance never runs")]
fn never_runs(provisioning_context: &ProvisioningContext) {
    provisioning_context.update_compute(|compute| compute.with_statuses([StatusStep::Missing]));
}

#[given("the channel answers on the first probe")]
fn channel_answers(provisioning_context: &ProvisioningContext) {
    provisioning_context.set_transport(ScriptedTransport::new([TransportStep::exit(0)]));
}

#[given("the channel never answers")]
fn channel_silent(provisioning_context: &ProvisioningContext) {
    provisioning_context.set_transport(ScriptedTransport::new([TransportStep::exit(255)]));
}

#[when("I create the instance")]
fn create_instance(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| fail(err.to_string()))?;
    let request = provisioning_context.request();
    let orchestrator =
        ProvisionOrchestrator::new(provisioning_context.compute(), provisioning_context.transport())
            .with_waiter(instant_waiter());
    let outcome = runtime.block_on(async { orchestrator.create(&request, &CancellationToken::new()).await });
    provisioning_context.record(outcome);
    Ok(())
}

#[then("provisioning succeeds")]
fn provisioning_succeeds(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    provisioned(provisioning_context).map(|_| ())
}

#[then("the created spec has an external access config")]
fn has_external_access(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    if created_spec(provisioning_context)?.has_external_access() {
        Ok(())
    } else {
        Err(fail("expected an external access config"))
    }
}

#[then("the created spec has no external access config")]
fn has_no_external_access(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    if created_spec(provisioning_context)?.has_external_access() {
        Err(fail("expected no external access config"))
    } else {
        Ok(())
    }
}

#[then("the created spec has no startup script")]
fn has_no_startup_script(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    match created_spec(provisioning_context)?.metadata_value(STARTUP_SCRIPT_KEY) {
        None => Ok(()),
        Some(_) => Err(fail("public instances must not carry a startup script")),
    }
}

#[then("the created spec carries the startup script")]
fn has_startup_script(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    let spec = created_spec(provisioning_context)?;
    let script = spec
        .metadata_value(STARTUP_SCRIPT_KEY)
        .ok_or_else(|| fail("missing startup script"))?;
    if script.contains("authorized_keys") && script.contains("gantry") {
        Ok(())
    } else {
        Err(fail(format!("unexpected startup script: {script}")))
    }
}

#[then("the descriptor targets \"{address}\" directly")]
fn descriptor_direct(provisioning_context: &ProvisioningContext, address: String) -> Result<(), StepError> {
    match descriptor(provisioning_context)?.transport {
        TransportParams::Direct { address: found, .. } if found == address => Ok(()),
        other => Err(fail(format!("expected direct transport to {address}, got {other:?}"))),
    }
}

#[then("the descriptor tunnels to \"{host}\" in project \"{project}\" and zone \"{zone}\"")]
fn descriptor_proxied(
    provisioning_context: &ProvisioningContext,
    host: String,
    project: String,
    zone: String,
) -> Result<(), StepError> {
    let found = descriptor(provisioning_context)?;
    let matches = found.host_name() == host
        && found.project() == Some(project.as_str())
        && found.zone() == Some(zone.as_str());
    if matches {
        Ok(())
    } else {
        Err(fail(format!("unexpected proxied descriptor: {found:?}")))
    }
}

#[then("the NAT finding is satisfied")]
fn nat_satisfied(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    let report = provisioned(provisioning_context)?.preflight;
    match report.nat.map(|finding| finding.status) {
        Some(FindingStatus::Satisfied { .. }) => Ok(()),
        other => Err(fail(format!("expected satisfied NAT finding, got {other:?}"))),
    }
}

#[then("the probe outcome is degraded")]
fn probe_degraded(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    match provisioned(provisioning_context)?.ready.probe {
        ProbeOutcome::Degraded { attempts: 6 } => Ok(()),
        other => Err(fail(format!("expected six degraded probes, got {other:?}"))),
    }
}

#[then("provisioning fails because NAT is missing")]
fn fails_nat_missing(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    match failure(provisioning_context)? {
        ProvisionError::Preflight(PreflightError::NatMissing(_)) => Ok(()),
        other => Err(fail(format!("expected NatMissing, got {other}"))),
    }
}

#[then("the failure explains how to create the NAT")]
fn failure_has_remediation(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    let message = failure(provisioning_context)?.to_string();
    if message.contains("gcloud compute routers nats create") {
        Ok(())
    } else {
        Err(fail(format!("missing remediation in: {message}")))
    }
}

#[then("no instance was created")]
fn nothing_created(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    match provisioning_context.compute().insert_calls() {
        0 => Ok(()),
        calls => Err(fail(format!("expected no create calls, got {calls}"))),
    }
}

#[then("provisioning fails with a status timeout after {checks} checks")]
fn fails_status_timeout(provisioning_context: &ProvisioningContext, checks: u32) -> Result<(), StepError> {
    match failure(provisioning_context)? {
        ProvisionError::Readiness(ReadinessError::StatusTimeout { attempts, .. })
            if attempts == checks && provisioning_context.compute().get_calls() == checks =>
        {
            Ok(())
        }
        other => Err(fail(format!("expected status timeout after {checks} checks, got {other}"))),
    }
}
