//! Typed facade over the Compute Engine control plane.
//!
//! [`ComputeApi`] is the seam every provisioning component depends on.
//! [`GceClient`] implements it over the REST API; tests use
//! [`crate::test_support::ScriptedCompute`].

mod error;
mod http;
mod status;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::ComputeError;
pub(crate) use error::CallContext;
pub use http::{GceClient, DEFAULT_API_BASE};
pub use status::ResourceStatus;
pub use types::{
    AccessConfig, AttachedDisk, Firewall, FirewallAllowed, InitializeParams, InstanceResource,
    Metadata, MetadataItem, NetworkInterface, Operation, OperationErrorEntry, OperationErrors,
    Router, RouterNat, RouterNatSubnetwork, Scheduling, ServiceAccount, Tags,
};

/// Future returned by control-plane operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Control-plane operations consumed by the provisioning flow.
///
/// Mutating calls block until the underlying long-running operation finishes.
/// The project is fixed by the implementation.
pub trait ComputeApi: Send + Sync {
    /// Creates an instance in `zone`.
    fn insert_instance<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a InstanceResource,
    ) -> ComputeFuture<'a, ()>;

    /// Fetches an instance, returning `None` when it does not exist.
    fn get_instance<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
    ) -> ComputeFuture<'a, Option<InstanceResource>>;

    /// Lists the instances in `zone`.
    fn list_instances<'a>(&'a self, zone: &'a str) -> ComputeFuture<'a, Vec<InstanceResource>>;

    /// Starts a stopped instance.
    fn start_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()>;

    /// Stops a running instance.
    fn stop_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()>;

    /// Deletes an instance.
    fn delete_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> ComputeFuture<'a, ()>;

    /// Lists the routers in `region`, including their NAT configurations.
    fn list_routers<'a>(&'a self, region: &'a str) -> ComputeFuture<'a, Vec<Router>>;

    /// Lists the project's firewall rules.
    fn list_firewalls(&self) -> ComputeFuture<'_, Vec<Firewall>>;
}

/// Strips the endpoint from a resource self-link such as
/// `https://www.googleapis.com/compute/v1/projects/p/regions/r/subnetworks/n`,
/// leaving the `projects/...` path. Any other reference is returned trimmed
/// but otherwise unchanged.
#[must_use]
pub fn resource_path(reference: &str) -> &str {
    let reference = reference.trim();
    if !(reference.starts_with("https://") || reference.starts_with("http://")) {
        return reference;
    }
    reference
        .find("/projects/")
        .and_then(|at| reference.get(at + 1..))
        .unwrap_or(reference)
}

/// Looks up an instance and maps it to a [`ResourceStatus`].
///
/// # Errors
///
/// Propagates any non-404 [`ComputeError`].
pub async fn fetch_status<C>(api: &C, zone: &str, name: &str) -> Result<ResourceStatus, ComputeError>
where
    C: ComputeApi + ?Sized,
{
    let instance = api.get_instance(zone, name).await?;
    Ok(ResourceStatus::of(instance.as_ref()))
}
