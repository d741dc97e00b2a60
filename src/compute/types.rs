//! Wire models for the subset of the Compute Engine REST API in use.

use serde::{Deserialize, Serialize};

/// Instance body used for `instances.insert` and returned by `instances.get`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceResource {
    /// Instance name.
    pub name: String,
    /// Machine type URL (`zones/<zone>/machineTypes/<type>`).
    pub machine_type: String,
    /// Raw lifecycle status; absent on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Attached disks.
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces.
    pub network_interfaces: Vec<NetworkInterface>,
    /// Key/value metadata.
    pub metadata: Metadata,
    /// Network tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Attached service accounts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
    /// Scheduling options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
}

impl InstanceResource {
    /// Returns the value stored under `key` in the instance metadata.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    /// Returns the first external NAT address on any interface.
    #[must_use]
    pub fn external_address(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .flat_map(|interface| interface.access_configs.iter())
            .find_map(|config| config.nat_ip.as_deref())
            .filter(|address| !address.is_empty())
    }

    /// Returns whether any interface carries an access config.
    #[must_use]
    pub fn has_external_access(&self) -> bool {
        self.network_interfaces
            .iter()
            .any(|interface| !interface.access_configs.is_empty())
    }
}

/// Disk attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDisk {
    /// Delete the disk together with the instance.
    pub auto_delete: bool,
    /// Boot disk marker.
    pub boot: bool,
    /// Parameters used to create the disk alongside the instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<InitializeParams>,
}

/// Creation parameters for a new disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeParams {
    /// Size in gigabytes, encoded as a decimal string.
    pub disk_size_gb: String,
    /// Disk type URL.
    pub disk_type: String,
    /// Source image reference.
    pub source_image: String,
}

/// Network interface of an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    /// Network URL or relative reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Subnetwork URL or relative reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnetwork: Option<String>,
    /// External access configurations; empty for internal-only interfaces.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
}

/// External access configuration of a network interface.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessConfig {
    /// Access config name.
    pub name: String,
    /// Network service tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_tier: Option<String>,
    /// External address assigned by the control plane.
    #[serde(rename = "natIP", skip_serializing_if = "Option::is_none")]
    pub nat_ip: Option<String>,
}

/// Instance metadata block.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Metadata {
    /// Metadata entries.
    pub items: Vec<MetadataItem>,
}

/// A single metadata entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct MetadataItem {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
}

/// Network tags applied to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Tags {
    /// Tag values.
    pub items: Vec<String>,
}

/// Service account attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServiceAccount {
    /// Service account email.
    pub email: String,
    /// OAuth scopes granted to the account.
    pub scopes: Vec<String>,
}

/// Scheduling options of an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scheduling {
    /// Restart automatically after host failures.
    pub automatic_restart: bool,
    /// `MIGRATE` or `TERMINATE`.
    pub on_host_maintenance: String,
}

/// Long-running operation handle.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Operation {
    /// Operation name used for waiting.
    pub name: String,
    /// `PENDING`, `RUNNING`, or `DONE`.
    pub status: String,
    /// Errors reported once the operation is done.
    pub error: Option<OperationErrors>,
}

impl Operation {
    /// Returns whether the operation has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    /// Joins the operation's error messages, if any.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        let errors = self.error.as_ref()?;
        if errors.errors.is_empty() {
            return None;
        }
        Some(
            errors
                .errors
                .iter()
                .map(|entry| format!("{}: {}", entry.code, entry.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Error block of an operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct OperationErrors {
    /// Individual errors.
    pub errors: Vec<OperationErrorEntry>,
}

/// One operation error.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct OperationErrorEntry {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Cloud Router with its NAT configurations.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Router {
    /// Router name.
    pub name: String,
    /// NAT configurations attached to the router.
    pub nats: Vec<RouterNat>,
}

/// NAT configuration of a router.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterNat {
    /// NAT name.
    pub name: String,
    /// `ALL_SUBNETWORKS_ALL_IP_RANGES`, `LIST_OF_SUBNETWORKS`, or another
    /// range selector.
    pub source_subnetwork_ip_ranges_to_nat: String,
    /// Subnetworks covered when the selector is `LIST_OF_SUBNETWORKS`.
    pub subnetworks: Vec<RouterNatSubnetwork>,
}

/// Subnetwork entry of a NAT configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RouterNatSubnetwork {
    /// Subnetwork URL.
    pub name: String,
}

/// Firewall rule.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Firewall {
    /// Rule name.
    pub name: String,
    /// Network URL the rule applies to.
    pub network: String,
    /// `INGRESS` or `EGRESS`.
    pub direction: String,
    /// Disabled rules are ignored.
    pub disabled: bool,
    /// Source CIDR ranges.
    pub source_ranges: Vec<String>,
    /// Allowed protocol/port pairs.
    pub allowed: Vec<FirewallAllowed>,
    /// Target tags; empty applies to every instance.
    pub target_tags: Vec<String>,
}

/// Allowed protocol entry of a firewall rule.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FirewallAllowed {
    /// Protocol name or number.
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    /// Ports or `low-high` ranges; empty covers every port.
    pub ports: Vec<String>,
}

/// One page of a list response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub(crate) items: Vec<T>,
    #[serde(default)]
    pub(crate) next_page_token: Option<String>,
}
