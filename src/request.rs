//! Immutable provisioning request shared by every provisioning component.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// How the command channel reaches the instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectivityMode {
    /// SSH straight to the instance's external address.
    Direct,
    /// SSH tunnelled through the Identity-Aware Proxy broker.
    Proxied,
}

impl ConnectivityMode {
    /// Returns the mode implied by the public-address flag.
    #[must_use]
    pub const fn from_public_ip(public_ip: bool) -> Self {
        if public_ip { Self::Direct } else { Self::Proxied }
    }
}

/// Parameters required to create and reach a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Instance name, unique within the zone.
    pub name: String,
    /// Project owning the instance.
    pub project: String,
    /// Target zone (for example `europe-west1-b`).
    pub zone: String,
    /// Machine type short name (for example `e2-standard-4`).
    pub machine_type: String,
    /// Boot disk size in gigabytes, as supplied by the caller.
    pub disk_size: String,
    /// Source image for the boot disk.
    pub disk_image: String,
    /// Network reference; empty selects the project default.
    pub network: String,
    /// Subnetwork reference; required for proxied mode.
    pub subnetwork: String,
    /// Whether the instance receives an external address.
    pub public_ip: bool,
    /// Optional network tag applied to the instance.
    pub tag: Option<String>,
    /// Optional service account email attached to the instance.
    pub service_account: Option<String>,
    /// Login user provisioned on the instance.
    pub login_user: String,
    /// Private working-state directory for this instance.
    pub workdir: Utf8PathBuf,
}

impl ProvisionRequest {
    /// Starts a builder for a [`ProvisionRequest`].
    #[must_use]
    pub fn builder() -> ProvisionRequestBuilder {
        ProvisionRequestBuilder::new()
    }

    /// Returns the connectivity mode selected by the public-address flag.
    #[must_use]
    pub const fn mode(&self) -> ConnectivityMode {
        ConnectivityMode::from_public_ip(self.public_ip)
    }

    /// Returns the region containing the zone (`europe-west1-b` →
    /// `europe-west1`).
    #[must_use]
    pub fn region(&self) -> &str {
        region_of(&self.zone).unwrap_or(self.zone.as_str())
    }

    /// Returns the working-state directory.
    #[must_use]
    pub fn workdir(&self) -> &Utf8Path {
        &self.workdir
    }

    /// Validates the request, returning the first offending field.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required field is empty and
    /// [`RequestError::InvalidZone`] when the zone has no region component.
    pub fn validate(&self) -> Result<(), RequestError> {
        let required = [
            ("name", self.name.as_str()),
            ("project", self.project.as_str()),
            ("zone", self.zone.as_str()),
            ("machine_type", self.machine_type.as_str()),
            ("disk_size", self.disk_size.as_str()),
            ("disk_image", self.disk_image.as_str()),
            ("login_user", self.login_user.as_str()),
            ("workdir", self.workdir.as_str()),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(RequestError::Validation(field.to_owned()));
            }
        }
        if region_of(&self.zone).is_none() {
            return Err(RequestError::InvalidZone(self.zone.clone()));
        }
        Ok(())
    }
}

fn region_of(zone: &str) -> Option<&str> {
    zone.rsplit_once('-')
        .map(|(region, _)| region)
        .filter(|region| !region.is_empty())
}

/// Builder for [`ProvisionRequest`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionRequestBuilder {
    name: String,
    project: String,
    zone: String,
    machine_type: String,
    disk_size: String,
    disk_image: String,
    network: String,
    subnetwork: String,
    public_ip: bool,
    tag: Option<String>,
    service_account: Option<String>,
    login_user: String,
    workdir: Utf8PathBuf,
}

impl ProvisionRequestBuilder {
    /// Creates an empty builder; required fields must be set before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the project.
    #[must_use]
    pub fn project(mut self, value: impl Into<String>) -> Self {
        self.project = value.into();
        self
    }

    /// Sets the zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the machine type.
    #[must_use]
    pub fn machine_type(mut self, value: impl Into<String>) -> Self {
        self.machine_type = value.into();
        self
    }

    /// Sets the boot disk size in gigabytes.
    #[must_use]
    pub fn disk_size(mut self, value: impl Into<String>) -> Self {
        self.disk_size = value.into();
        self
    }

    /// Sets the boot disk image.
    #[must_use]
    pub fn disk_image(mut self, value: impl Into<String>) -> Self {
        self.disk_image = value.into();
        self
    }

    /// Sets the network reference.
    #[must_use]
    pub fn network(mut self, value: impl Into<String>) -> Self {
        self.network = value.into();
        self
    }

    /// Sets the subnetwork reference.
    #[must_use]
    pub fn subnetwork(mut self, value: impl Into<String>) -> Self {
        self.subnetwork = value.into();
        self
    }

    /// Sets the public-address flag.
    #[must_use]
    pub const fn public_ip(mut self, value: bool) -> Self {
        self.public_ip = value;
        self
    }

    /// Sets the optional network tag.
    #[must_use]
    pub fn tag(mut self, value: Option<String>) -> Self {
        self.tag = value;
        self
    }

    /// Sets the optional service account email.
    #[must_use]
    pub fn service_account(mut self, value: Option<String>) -> Self {
        self.service_account = value;
        self
    }

    /// Sets the login user.
    #[must_use]
    pub fn login_user(mut self, value: impl Into<String>) -> Self {
        self.login_user = value.into();
        self
    }

    /// Sets the working-state directory.
    #[must_use]
    pub fn workdir(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.workdir = value.into();
        self
    }

    /// Builds and validates the [`ProvisionRequest`], trimming string inputs.
    /// Optional values that trim to nothing are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when a required field is empty or the zone is
    /// malformed.
    pub fn build(self) -> Result<ProvisionRequest, RequestError> {
        let request = ProvisionRequest {
            name: self.name.trim().to_owned(),
            project: self.project.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            machine_type: self.machine_type.trim().to_owned(),
            disk_size: self.disk_size.trim().to_owned(),
            disk_image: self.disk_image.trim().to_owned(),
            network: self.network.trim().to_owned(),
            subnetwork: self.subnetwork.trim().to_owned(),
            public_ip: self.public_ip,
            tag: non_empty(self.tag),
            service_account: non_empty(self.service_account),
            login_user: self.login_user.trim().to_owned(),
            workdir: self.workdir,
        };
        request.validate()?;
        Ok(request)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_owned())
        .filter(|inner| !inner.is_empty())
}

/// Errors raised while building a [`ProvisionRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the zone does not contain a region component.
    #[error("zone '{0}' is not of the form <region>-<letter>")]
    InvalidZone(String),
}
