//! Core library for the Gantry provisioning tool.
//!
//! The crate takes a bare creation request to an instance whose SSH channel
//! is verifiably usable. Instances with a public address are reached
//! directly; instances without one are reached through an IAP tunnel after a
//! network preflight confirms the subnet has Cloud NAT.
//!
//! The flow is create → wait for `Running` → write the SSH descriptor →
//! probe the channel, with every wait bounded by a [`RetryPolicy`].

pub mod auth;
pub mod compute;
pub mod config;
pub mod descriptor;
pub mod instance_spec;
pub mod keys;
pub mod logging;
pub mod preflight;
pub mod provision;
pub mod readiness;
pub mod request;
pub mod retry;
pub mod runner;
pub mod test_support;
pub mod transport;
pub mod workdir;

pub use compute::{ComputeApi, ComputeError, GceClient, ResourceStatus};
pub use config::{ConfigError, ProviderConfig};
pub use descriptor::{ConnectivityConfigurer, ConnectivityDescriptor, DescriptorError};
pub use instance_spec::{InstanceSpecBuilder, MaintenancePolicy, SpecError};
pub use preflight::{NetworkPreflight, PreflightError, PreflightFinding, PreflightReport};
pub use provision::{ProvisionError, ProvisionOrchestrator, Provisioned};
pub use readiness::{
    ProbeOutcome, ProbeTimeoutPolicy, ReadinessError, ReadinessWaiter, ReadyInstance,
    StoppedPolicy,
};
pub use request::{ConnectivityMode, ProvisionRequest, ProvisionRequestBuilder, RequestError};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{CommandError, CommandRunner};
pub use transport::{ChannelTransport, SshTransport};
