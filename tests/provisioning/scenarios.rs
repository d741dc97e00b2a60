//! BDD scenarios for the provisioning flow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningContext, provisioning_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Public instance is reached directly"
)]
fn scenario_public_direct(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Private instance behind Cloud NAT is reached through the tunnel"
)]
fn scenario_private_proxied(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Private instance without Cloud NAT is never created"
)]
fn scenario_private_without_nat(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Unanswered probes degrade instead of failing"
)]
fn scenario_probe_degrades(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "An instance that never runs exhausts the status budget"
)]
fn scenario_status_timeout(provisioning_context: ProvisioningContext) {
    drop(provisioning_context);
}
