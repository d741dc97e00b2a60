//! Persisted SSH client configuration describing how to reach an instance.
//!
//! The descriptor is written once, after the instance is observed running,
//! to `<workdir>/ssh_config`. Every later command invocation reads it back,
//! so [`ConnectivityDescriptor::render`] and [`ConnectivityDescriptor::parse`]
//! are exact inverses for the transport parameters.

use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::compute::{InstanceResource, ResourceStatus};
use crate::keys;
use crate::request::{ConnectivityMode, ProvisionRequest};
use crate::workdir::{self, WorkdirError};

/// File name of the descriptor inside the working-state directory.
pub const DESCRIPTOR_FILE: &str = "ssh_config";

/// Port the command channel listens on.
pub const DEFAULT_SSH_PORT: u16 = 22;

const HEADER: &str = "# gantry connection descriptor";

/// How the channel reaches the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportParams {
    /// Connect to an external address.
    Direct {
        /// External address of the instance.
        address: String,
        /// SSH port.
        port: u16,
    },
    /// Connect through a proxy command launched per connection.
    Proxied {
        /// Host name handed to the proxy (`%h`).
        host: String,
        /// Port handed to the proxy (`%p`).
        port: u16,
        /// Proxy launch command with `%h`/`%p` placeholders.
        proxy_command: String,
    },
}

impl TransportParams {
    /// Returns the connectivity mode of these parameters.
    #[must_use]
    pub const fn mode(&self) -> ConnectivityMode {
        match self {
            Self::Direct { .. } => ConnectivityMode::Direct,
            Self::Proxied { .. } => ConnectivityMode::Proxied,
        }
    }

    fn host_name(&self) -> &str {
        match self {
            Self::Direct { address, .. } => address,
            Self::Proxied { host, .. } => host,
        }
    }

    const fn port(&self) -> u16 {
        match self {
            Self::Direct { port, .. } | Self::Proxied { port, .. } => *port,
        }
    }
}

/// Keep-alive and reconnection settings of the channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelHealth {
    /// `ConnectTimeout`, in seconds.
    pub connect_timeout_secs: u32,
    /// `ServerAliveInterval`, in seconds.
    pub server_alive_interval_secs: u32,
    /// `ServerAliveCountMax`.
    pub server_alive_count_max: u32,
    /// `ConnectionAttempts`.
    pub connection_attempts: u32,
}

impl Default for ChannelHealth {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            server_alive_interval_secs: 30,
            server_alive_count_max: 10,
            connection_attempts: 3,
        }
    }
}

/// Everything needed to open the command channel to one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectivityDescriptor {
    /// `Host` alias used on the `ssh` command line.
    pub host_alias: String,
    /// Login user.
    pub user: String,
    /// Private key path.
    pub identity_file: Utf8PathBuf,
    /// Transport parameters.
    pub transport: TransportParams,
    /// Channel health settings.
    pub health: ChannelHealth,
}

/// Errors raised while building, writing, or reading descriptors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when asked to describe an instance that is not running.
    #[error("instance {instance} is {status}; descriptors are only built for running instances")]
    NotRunning {
        /// Instance name.
        instance: String,
        /// Observed status.
        status: String,
    },
    /// Raised when a direct-mode instance has no external address.
    #[error("instance {instance} has no external NAT address")]
    MissingExternalAddress {
        /// Instance name.
        instance: String,
    },
    /// Raised when a required directive is absent from a stored descriptor.
    #[error("descriptor `{path}` is missing `{directive}`")]
    MissingDirective {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Directive name.
        directive: &'static str,
    },
    /// Raised when a directive has an unparseable value.
    #[error("descriptor `{path}` has an invalid `{directive}` value: {value}")]
    InvalidDirective {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Directive name.
        directive: &'static str,
        /// Offending value.
        value: String,
    },
    /// Raised when no descriptor exists yet.
    #[error("no descriptor at `{0}`; run `gantry create` first")]
    NotConfigured(Utf8PathBuf),
    /// Raised when the descriptor cannot be read or written.
    #[error(transparent)]
    Workdir(#[from] WorkdirError),
}

fn quote(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_owned()
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

impl ConnectivityDescriptor {
    /// Returns the connectivity mode.
    #[must_use]
    pub const fn mode(&self) -> ConnectivityMode {
        self.transport.mode()
    }

    /// Returns the `HostName` value.
    #[must_use]
    pub fn host_name(&self) -> &str {
        self.transport.host_name()
    }

    /// Returns the SSH port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.transport.port()
    }

    /// Returns the proxy command in proxied mode.
    #[must_use]
    pub fn proxy_command(&self) -> Option<&str> {
        match &self.transport {
            TransportParams::Proxied { proxy_command, .. } => Some(proxy_command),
            TransportParams::Direct { .. } => None,
        }
    }

    fn proxy_flag(&self, flag: &str) -> Option<&str> {
        let prefix = format!("--{flag}=");
        self.proxy_command()?
            .split_whitespace()
            .find_map(|arg| arg.strip_prefix(prefix.as_str()))
    }

    /// Returns the project encoded in the proxy command.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        self.proxy_flag("project")
    }

    /// Returns the zone encoded in the proxy command.
    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        self.proxy_flag("zone")
    }

    /// Renders the descriptor in SSH client configuration grammar.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &str| {
            writeln!(out, "    {key} {value}").ok();
        };
        line("HostName", self.host_name());
        line("Port", &self.port().to_string());
        line("User", &self.user);
        line("IdentityFile", &quote(self.identity_file.as_str()));
        line("IdentitiesOnly", "yes");
        line("StrictHostKeyChecking", "no");
        line("UserKnownHostsFile", "/dev/null");
        if let Some(proxy) = self.proxy_command() {
            line("ProxyCommand", proxy);
        }
        line("ConnectTimeout", &self.health.connect_timeout_secs.to_string());
        line(
            "ServerAliveInterval",
            &self.health.server_alive_interval_secs.to_string(),
        );
        line(
            "ServerAliveCountMax",
            &self.health.server_alive_count_max.to_string(),
        );
        line(
            "ConnectionAttempts",
            &self.health.connection_attempts.to_string(),
        );
        line("TCPKeepAlive", "yes");
        format!("{HEADER}\nHost {}\n{out}", self.host_alias)
    }

    /// Parses a descriptor previously produced by [`Self::render`].
    /// Unknown directives and comments are ignored. The presence of
    /// `ProxyCommand` selects proxied mode.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when a required directive is missing or a
    /// numeric value is malformed. `path` is used for messages only.
    pub fn parse(text: &str, path: &Utf8Path) -> Result<Self, DescriptorError> {
        let mut host_alias = None;
        let mut host_name = None;
        let mut port = None;
        let mut user = None;
        let mut identity_file = None;
        let mut proxy_command = None;
        let mut health = ChannelHealth::default();

        let invalid = |directive: &'static str, value: &str| DescriptorError::InvalidDirective {
            path: path.to_path_buf(),
            directive,
            value: value.to_owned(),
        };
        let number = |directive: &'static str, value: &str| {
            value.parse::<u32>().map_err(|_| invalid(directive, value))
        };

        for raw in text.lines() {
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let (key, value) = entry
                .split_once(char::is_whitespace)
                .map_or((entry, ""), |(key, value)| (key, value.trim()));
            match key.to_ascii_lowercase().as_str() {
                "host" => host_alias = Some(value.to_owned()),
                "hostname" => host_name = Some(value.to_owned()),
                "port" => {
                    port = Some(value.parse::<u16>().map_err(|_| invalid("Port", value))?);
                }
                "user" => user = Some(value.to_owned()),
                "identityfile" => identity_file = Some(Utf8PathBuf::from(unquote(value))),
                "proxycommand" => proxy_command = Some(value.to_owned()),
                "connecttimeout" => health.connect_timeout_secs = number("ConnectTimeout", value)?,
                "serveraliveinterval" => {
                    health.server_alive_interval_secs = number("ServerAliveInterval", value)?;
                }
                "serveralivecountmax" => {
                    health.server_alive_count_max = number("ServerAliveCountMax", value)?;
                }
                "connectionattempts" => {
                    health.connection_attempts = number("ConnectionAttempts", value)?;
                }
                _ => {}
            }
        }

        let missing = |directive: &'static str| DescriptorError::MissingDirective {
            path: path.to_path_buf(),
            directive,
        };
        let host_alias = host_alias.ok_or_else(|| missing("Host"))?;
        let host_name = host_name.ok_or_else(|| missing("HostName"))?;
        let port = port.unwrap_or(DEFAULT_SSH_PORT);
        let transport = match proxy_command {
            Some(proxy_command) => TransportParams::Proxied {
                host: host_name,
                port,
                proxy_command,
            },
            None => TransportParams::Direct {
                address: host_name,
                port,
            },
        };

        Ok(Self {
            host_alias,
            user: user.ok_or_else(|| missing("User"))?,
            identity_file: identity_file.ok_or_else(|| missing("IdentityFile"))?,
            transport,
            health,
        })
    }
}

/// Builds, persists, and reloads connectivity descriptors.
#[derive(Clone, Debug)]
pub struct ConnectivityConfigurer {
    gcloud_bin: String,
    health: ChannelHealth,
}

impl Default for ConnectivityConfigurer {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

impl ConnectivityConfigurer {
    /// Uses `gcloud_bin` to launch the proxy tunnel.
    #[must_use]
    pub fn new(gcloud_bin: impl Into<String>) -> Self {
        Self {
            gcloud_bin: gcloud_bin.into(),
            health: ChannelHealth::default(),
        }
    }

    /// Overrides the channel health settings.
    #[must_use]
    pub const fn with_health(mut self, health: ChannelHealth) -> Self {
        self.health = health;
        self
    }

    /// Returns the descriptor path for `workdir`.
    #[must_use]
    pub fn descriptor_path(workdir: &Utf8Path) -> Utf8PathBuf {
        workdir.join(DESCRIPTOR_FILE)
    }

    /// Returns the proxy command that tunnels to `project`/`zone`.
    #[must_use]
    pub fn proxy_command(&self, project: &str, zone: &str) -> String {
        format!(
            "{} compute start-iap-tunnel %h %p --listen-on-stdin --project={project} --zone={zone} --verbosity=warning",
            self.gcloud_bin
        )
    }

    /// Builds the descriptor for a running instance without touching disk.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::NotRunning`] unless the instance is running
    /// and [`DescriptorError::MissingExternalAddress`] when direct mode has no
    /// address to target.
    pub fn build(
        &self,
        request: &ProvisionRequest,
        instance: &InstanceResource,
    ) -> Result<ConnectivityDescriptor, DescriptorError> {
        let status = ResourceStatus::of(Some(instance));
        if !status.is_running() {
            return Err(DescriptorError::NotRunning {
                instance: request.name.clone(),
                status: status.to_string(),
            });
        }
        let transport = match request.mode() {
            ConnectivityMode::Direct => TransportParams::Direct {
                address: instance
                    .external_address()
                    .ok_or_else(|| DescriptorError::MissingExternalAddress {
                        instance: request.name.clone(),
                    })?
                    .to_owned(),
                port: DEFAULT_SSH_PORT,
            },
            ConnectivityMode::Proxied => TransportParams::Proxied {
                host: request.name.clone(),
                port: DEFAULT_SSH_PORT,
                proxy_command: self.proxy_command(&request.project, &request.zone),
            },
        };
        Ok(ConnectivityDescriptor {
            host_alias: request.name.clone(),
            user: request.login_user.clone(),
            identity_file: keys::private_key_path(request.workdir()),
            transport,
            health: self.health,
        })
    }

    /// Builds the descriptor and writes it with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the descriptor cannot be built or
    /// written.
    pub fn configure(
        &self,
        request: &ProvisionRequest,
        instance: &InstanceResource,
    ) -> Result<ConnectivityDescriptor, DescriptorError> {
        let descriptor = self.build(request, instance)?;
        let path = workdir::write_private(request.workdir(), DESCRIPTOR_FILE, descriptor.render())?;
        info!(path = %path, mode = ?descriptor.mode(), "wrote connectivity descriptor");
        Ok(descriptor)
    }

    /// Reads the descriptor stored in `workdir`.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::NotConfigured`] when no descriptor exists,
    /// or a parse or I/O error.
    pub fn load(workdir: &Utf8Path) -> Result<ConnectivityDescriptor, DescriptorError> {
        let path = Self::descriptor_path(workdir);
        let text = workdir::read_optional(workdir, DESCRIPTOR_FILE)?
            .ok_or_else(|| DescriptorError::NotConfigured(path.clone()))?;
        ConnectivityDescriptor::parse(&text, &path)
    }
}
