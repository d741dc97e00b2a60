//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::readiness::{ProbeTimeoutPolicy, ReadinessWaiter, StoppedPolicy};
use crate::request::{ProvisionRequest, RequestError};

/// Default machine type for new instances.
pub const DEFAULT_MACHINE_TYPE: &str = "e2-standard-4";

/// Default boot disk size in gigabytes.
pub const DEFAULT_DISK_SIZE: &str = "40";

/// Default boot image.
pub const DEFAULT_DISK_IMAGE: &str = "projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts";

/// Default login user created on the instance.
pub const DEFAULT_LOGIN_USER: &str = "gantry";

/// Provider settings derived from environment variables and configuration
/// files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GANTRY",
    discovery(
        app_name = "gantry",
        env_var = "GANTRY_CONFIG_PATH",
        config_file_name = "gantry.toml",
        dotfile_name = ".gantry.toml",
        project_file_name = "gantry.toml"
    )
)]
pub struct ProviderConfig {
    /// Project that owns the instance.
    pub project: String,
    /// Zone the instance lives in, for example `europe-west1-b`.
    pub zone: String,
    /// Instance name.
    pub machine_id: String,
    /// Working-state directory holding the key pair and SSH descriptor.
    pub machine_folder: String,
    /// Machine type for new instances.
    #[ortho_config(default = DEFAULT_MACHINE_TYPE.to_owned())]
    pub machine_type: String,
    /// Boot disk size in gigabytes.
    #[ortho_config(default = DEFAULT_DISK_SIZE.to_owned())]
    pub disk_size: String,
    /// Boot image reference.
    #[ortho_config(default = DEFAULT_DISK_IMAGE.to_owned())]
    pub disk_image: String,
    /// Network reference; empty selects the project's default network.
    #[ortho_config(default = String::new())]
    pub network: String,
    /// Subnetwork reference; required when `public_ip` is false.
    #[ortho_config(default = String::new())]
    pub subnetwork: String,
    /// Network tag applied to the instance.
    pub tag: Option<String>,
    /// Service account email attached to the instance.
    pub service_account: Option<String>,
    /// Whether the instance gets an external address. Without one, SSH goes
    /// through an IAP tunnel.
    #[ortho_config(default = true)]
    pub public_ip: bool,
    /// Login user created on the instance.
    #[ortho_config(default = DEFAULT_LOGIN_USER.to_owned())]
    pub login_user: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `gcloud` executable.
    #[ortho_config(default = "gcloud".to_owned())]
    pub gcloud_bin: String,
    /// Bearer token for the Compute API; when unset the token comes from
    /// `gcloud auth print-access-token`.
    pub access_token: Option<String>,
    /// Fail provisioning when the channel probe never answers.
    #[ortho_config(default = false)]
    pub strict_readiness: bool,
    /// Fail the readiness wait as soon as the instance reports stopping.
    #[ortho_config(default = false)]
    pub fail_fast_on_stop: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 8] = [
    FieldMetadata::new("project", "GANTRY_PROJECT", "project"),
    FieldMetadata::new("zone", "GANTRY_ZONE", "zone"),
    FieldMetadata::new("instance name", "GANTRY_MACHINE_ID", "machine_id"),
    FieldMetadata::new("working directory", "GANTRY_MACHINE_FOLDER", "machine_folder"),
    FieldMetadata::new("machine type", "GANTRY_MACHINE_TYPE", "machine_type"),
    FieldMetadata::new("disk size", "GANTRY_DISK_SIZE", "disk_size"),
    FieldMetadata::new("disk image", "GANTRY_DISK_IMAGE", "disk_image"),
    FieldMetadata::new("login user", "GANTRY_LOGIN_USER", "login_user"),
];

impl ProviderConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to gantry.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn required_values(&self) -> [&str; 8] {
        [
            self.project.as_str(),
            self.zone.as_str(),
            self.machine_id.as_str(),
            self.machine_folder.as_str(),
            self.machine_type.as_str(),
            self.disk_size.as_str(),
            self.disk_image.as_str(),
            self.login_user.as_str(),
        ]
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("gantry")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// and [`ConfigError::MissingSubnetwork`] when the instance has no public
    /// address and no subnetwork.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in self.required_values().into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        if !self.public_ip && self.subnetwork.trim().is_empty() {
            return Err(ConfigError::MissingSubnetwork);
        }
        Ok(())
    }

    /// Builds a [`ProvisionRequest`] from the configured values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_request(&self) -> Result<ProvisionRequest, ConfigError> {
        self.validate()?;
        ProvisionRequest::builder()
            .name(&self.machine_id)
            .project(&self.project)
            .zone(&self.zone)
            .machine_type(&self.machine_type)
            .disk_size(&self.disk_size)
            .disk_image(&self.disk_image)
            .network(&self.network)
            .subnetwork(&self.subnetwork)
            .public_ip(self.public_ip)
            .tag(self.tag.clone())
            .service_account(self.service_account.clone())
            .login_user(&self.login_user)
            .workdir(Utf8PathBuf::from(self.machine_folder.trim()))
            .build()
            .map_err(ConfigError::from)
    }

    /// Builds a readiness waiter honouring the strictness toggles.
    #[must_use]
    pub const fn readiness_waiter(&self) -> ReadinessWaiter {
        let probe = if self.strict_readiness {
            ProbeTimeoutPolicy::Fail
        } else {
            ProbeTimeoutPolicy::Degrade
        };
        let stopped = if self.fail_fast_on_stop {
            StoppedPolicy::FailFast
        } else {
            StoppedPolicy::KeepPolling
        };
        ReadinessWaiter::new()
            .with_probe_timeout(probe)
            .with_stopped_policy(stopped)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when neither a public address nor a subnetwork is configured.
    #[error(
        "missing subnetwork: instances without a public address need GANTRY_SUBNETWORK or subnetwork in gantry.toml"
    )]
    MissingSubnetwork,
    /// Raised when the configured values do not form a valid request.
    #[error("invalid configuration: {0}")]
    Request(#[from] RequestError),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
