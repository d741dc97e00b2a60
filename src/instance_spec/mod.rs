//! Pure translation of a [`ProvisionRequest`] into an instance insert body.

pub mod bootstrap;

use thiserror::Error;

use crate::compute::{
    AccessConfig, AttachedDisk, InitializeParams, InstanceResource, Metadata, MetadataItem,
    NetworkInterface, Scheduling, ServiceAccount, Tags, resource_path,
};
use crate::request::{ConnectivityMode, ProvisionRequest};

/// OAuth scope granted to an attached service account.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DISK_TYPE: &str = "pd-balanced";
const EXTERNAL_ACCESS_NAME: &str = "External NAT";
const EXTERNAL_NETWORK_TIER: &str = "STANDARD";

/// Host maintenance behaviour requested for an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaintenancePolicy {
    /// Live-migrate during host maintenance.
    Migrate,
    /// Stop during host maintenance; required for accelerator families.
    Terminate,
}

impl MaintenancePolicy {
    /// Selects the policy for a machine type. Families whose names start with
    /// `a`, `g`, or `n` followed by a digit (`a2`, `g2`, `n1` with GPUs, and so
    /// on) cannot live-migrate.
    #[must_use]
    pub fn for_machine_type(machine_type: &str) -> Self {
        let bytes = machine_type.as_bytes();
        match bytes {
            [b'a' | b'g' | b'n', digit, ..] if digit.is_ascii_digit() => Self::Terminate,
            _ => Self::Migrate,
        }
    }

    /// Returns the API value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Migrate => "MIGRATE",
            Self::Terminate => "TERMINATE",
        }
    }
}

/// Errors raised while building an instance body.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when the disk size is not a positive whole number of gigabytes.
    #[error("disk size '{0}' must be a positive whole number of gigabytes")]
    InvalidDiskSize(String),
    /// Raised when the network reference matches no accepted form.
    #[error(
        "network '{0}' must be <name>, <project>/<name>, or projects/<project>/global/networks/<name>"
    )]
    InvalidNetwork(String),
    /// Raised when the subnetwork reference matches no accepted form.
    #[error(
        "subnetwork '{0}' must be <name>, <region>/<name>, <project>/<region>/<name>, or projects/<project>/regions/<region>/subnetworks/<name>"
    )]
    InvalidSubnetwork(String),
    /// Raised when the login user is not a safe POSIX login name.
    #[error("login user '{0}' must start with a lowercase letter or underscore and contain only [a-z0-9_-]")]
    InvalidLoginUser(String),
    /// Raised when the public key is empty.
    #[error("public key must not be empty")]
    EmptyPublicKey,
}

/// Builds instance insert bodies from provisioning requests.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstanceSpecBuilder;

impl InstanceSpecBuilder {
    /// Produces the insert body for `request`, authorising `public_key` for
    /// the login user.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when the disk size, a network reference, the
    /// login user, or the key is malformed.
    pub fn build(
        request: &ProvisionRequest,
        public_key: &str,
    ) -> Result<InstanceResource, SpecError> {
        let disk_size_gb = parse_disk_size(&request.disk_size)?;
        let network = normalize_network(&request.project, &request.network)?;
        let subnetwork =
            normalize_subnetwork(&request.project, request.region(), &request.subnetwork)?;
        if !bootstrap::is_valid_login_name(&request.login_user) {
            return Err(SpecError::InvalidLoginUser(request.login_user.clone()));
        }
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(SpecError::EmptyPublicKey);
        }

        let mode = request.mode();
        let zone_path = format!("projects/{}/zones/{}", request.project, request.zone);

        let mut items = vec![MetadataItem {
            key: bootstrap::SSH_KEYS_KEY.to_owned(),
            value: format!("{}:{public_key}", request.login_user),
        }];
        if mode == ConnectivityMode::Proxied {
            items.push(MetadataItem {
                key: bootstrap::STARTUP_SCRIPT_KEY.to_owned(),
                value: bootstrap::render(&request.login_user),
            });
        }

        let access_configs = match mode {
            ConnectivityMode::Direct => vec![AccessConfig {
                name: EXTERNAL_ACCESS_NAME.to_owned(),
                network_tier: Some(EXTERNAL_NETWORK_TIER.to_owned()),
                nat_ip: None,
            }],
            ConnectivityMode::Proxied => Vec::new(),
        };

        let service_accounts = request
            .service_account
            .iter()
            .map(|email| ServiceAccount {
                email: email.clone(),
                scopes: vec![CLOUD_PLATFORM_SCOPE.to_owned()],
            })
            .collect();

        Ok(InstanceResource {
            name: request.name.clone(),
            machine_type: format!("{zone_path}/machineTypes/{}", request.machine_type),
            status: None,
            disks: vec![AttachedDisk {
                auto_delete: true,
                boot: true,
                initialize_params: Some(InitializeParams {
                    disk_size_gb: disk_size_gb.to_string(),
                    disk_type: format!("{zone_path}/diskTypes/{DISK_TYPE}"),
                    source_image: request.disk_image.clone(),
                }),
            }],
            network_interfaces: vec![NetworkInterface {
                network,
                subnetwork,
                access_configs,
            }],
            metadata: Metadata { items },
            tags: request.tag.as_ref().map(|tag| Tags {
                items: vec![tag.clone()],
            }),
            service_accounts,
            scheduling: Some(Scheduling {
                automatic_restart: true,
                on_host_maintenance: MaintenancePolicy::for_machine_type(&request.machine_type)
                    .as_str()
                    .to_owned(),
            }),
        })
    }
}

fn parse_disk_size(raw: &str) -> Result<u64, SpecError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|size| *size > 0)
        .ok_or_else(|| SpecError::InvalidDiskSize(raw.to_owned()))
}

fn segments(reference: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = reference.split('/').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return None;
    }
    Some(parts)
}

/// Expands a network reference to `projects/<p>/global/networks/<n>`.
/// An empty reference selects the project's default network.
///
/// # Errors
///
/// Returns [`SpecError::InvalidNetwork`] for any other shape.
pub fn normalize_network(project: &str, reference: &str) -> Result<Option<String>, SpecError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Ok(None);
    }
    let invalid = || SpecError::InvalidNetwork(reference.to_owned());
    let parts = segments(resource_path(reference)).ok_or_else(invalid)?;
    match parts.as_slice() {
        ["projects", owner, "global", "networks", name] => {
            Ok(Some(format!("projects/{owner}/global/networks/{name}")))
        }
        [owner, name] if *owner != "projects" => {
            Ok(Some(format!("projects/{owner}/global/networks/{name}")))
        }
        [name] => Ok(Some(format!("projects/{project}/global/networks/{name}"))),
        _ => Err(invalid()),
    }
}

/// Expands a subnetwork reference to
/// `projects/<p>/regions/<r>/subnetworks/<n>`. Bare names resolve in the
/// request's project and region. An empty reference yields `None`.
///
/// # Errors
///
/// Returns [`SpecError::InvalidSubnetwork`] for any other shape.
pub fn normalize_subnetwork(
    project: &str,
    region: &str,
    reference: &str,
) -> Result<Option<String>, SpecError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Ok(None);
    }
    let invalid = || SpecError::InvalidSubnetwork(reference.to_owned());
    let parts = segments(resource_path(reference)).ok_or_else(invalid)?;
    let (owner, location, name) = match parts.as_slice() {
        ["projects", owner, "regions", location, "subnetworks", name] => (*owner, *location, *name),
        [owner, location, name] if *owner != "projects" => (*owner, *location, *name),
        [location, name] if *location != "projects" => (project, *location, *name),
        [name] => (project, region, *name),
        _ => return Err(invalid()),
    };
    Ok(Some(format!(
        "projects/{owner}/regions/{location}/subnetworks/{name}"
    )))
}
