//! `ssh` client transports.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::descriptor::{ConnectivityDescriptor, TransportParams};
use crate::request::ConnectivityMode;

use super::{
    ChannelExit, ChannelIo, ChannelRequest, ChannelTransport, TransportError, TransportFuture,
};

fn option(args: &mut Vec<OsString>, value: String) {
    args.push(OsString::from("-o"));
    args.push(OsString::from(value));
}

/// Builds the `ssh` argument vector for a request.
///
/// Every channel setting comes from the descriptor; `connect_timeout`
/// overrides its `ConnectTimeout`. The remote command is passed verbatim.
#[must_use]
pub fn ssh_args(
    descriptor: &ConnectivityDescriptor,
    command: &str,
    connect_timeout: Option<Duration>,
) -> Vec<OsString> {
    let health = descriptor.health;
    let timeout_secs = connect_timeout.map_or(u64::from(health.connect_timeout_secs), |timeout| {
        timeout.as_secs().max(1)
    });
    let mut args = vec![
        OsString::from("-p"),
        OsString::from(descriptor.port().to_string()),
        OsString::from("-i"),
        OsString::from(descriptor.identity_file.as_str()),
    ];
    option(&mut args, String::from("IdentitiesOnly=yes"));
    option(&mut args, String::from("BatchMode=yes"));
    option(&mut args, String::from("StrictHostKeyChecking=no"));
    option(&mut args, String::from("UserKnownHostsFile=/dev/null"));
    option(&mut args, String::from("LogLevel=ERROR"));
    option(&mut args, format!("ConnectTimeout={timeout_secs}"));
    option(
        &mut args,
        format!("ServerAliveInterval={}", health.server_alive_interval_secs),
    );
    option(
        &mut args,
        format!("ServerAliveCountMax={}", health.server_alive_count_max),
    );
    option(
        &mut args,
        format!("ConnectionAttempts={}", health.connection_attempts),
    );
    if let Some(proxy) = descriptor.proxy_command() {
        option(&mut args, format!("ProxyCommand={proxy}"));
    }
    args.push(OsString::from(format!(
        "{}@{}",
        descriptor.user,
        descriptor.host_name()
    )));
    args.push(OsString::from("--"));
    args.push(OsString::from(command));
    args
}

async fn spawn_ssh(program: &str, request: ChannelRequest<'_>) -> Result<ChannelExit, TransportError> {
    let args = ssh_args(request.descriptor, request.command, request.connect_timeout);
    debug!(program, host = request.descriptor.host_name(), command = request.command, "running ssh");
    let mut command = Command::new(program);
    command.args(&args).kill_on_drop(true);
    match request.io {
        ChannelIo::Inherit => {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        ChannelIo::Silent => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }
    let mut child = command.spawn().map_err(|err| TransportError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    })?;
    let status = child.wait().await.map_err(|err| TransportError::Wait {
        program: program.to_owned(),
        message: err.to_string(),
    })?;
    Ok(ChannelExit {
        code: status.code(),
    })
}

/// Connects straight to the instance's external address.
#[derive(Clone, Debug)]
pub struct DirectSsh {
    ssh_bin: String,
}

impl DirectSsh {
    /// Uses `ssh_bin` as the client.
    #[must_use]
    pub fn new(ssh_bin: impl Into<String>) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
        }
    }
}

impl ChannelTransport for DirectSsh {
    fn execute<'a>(&'a self, request: ChannelRequest<'a>) -> TransportFuture<'a> {
        Box::pin(async move {
            if let TransportParams::Proxied { .. } = request.descriptor.transport {
                return Err(TransportError::ModeMismatch {
                    transport: "direct",
                    found: ConnectivityMode::Proxied,
                });
            }
            spawn_ssh(&self.ssh_bin, request).await
        })
    }
}

/// Connects through the descriptor's proxy command.
#[derive(Clone, Debug)]
pub struct ProxiedSsh {
    ssh_bin: String,
}

impl ProxiedSsh {
    /// Uses `ssh_bin` as the client.
    #[must_use]
    pub fn new(ssh_bin: impl Into<String>) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
        }
    }
}

impl ChannelTransport for ProxiedSsh {
    fn execute<'a>(&'a self, request: ChannelRequest<'a>) -> TransportFuture<'a> {
        Box::pin(async move {
            if let TransportParams::Direct { .. } = request.descriptor.transport {
                return Err(TransportError::ModeMismatch {
                    transport: "proxied",
                    found: ConnectivityMode::Direct,
                });
            }
            spawn_ssh(&self.ssh_bin, request).await
        })
    }
}

/// Picks [`DirectSsh`] or [`ProxiedSsh`] from the descriptor's mode.
#[derive(Clone, Debug)]
pub struct SshTransport {
    direct: DirectSsh,
    proxied: ProxiedSsh,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl SshTransport {
    /// Uses `ssh_bin` for both modes.
    #[must_use]
    pub fn new(ssh_bin: impl Into<String>) -> Self {
        let ssh_bin = ssh_bin.into();
        Self {
            direct: DirectSsh::new(ssh_bin.clone()),
            proxied: ProxiedSsh::new(ssh_bin),
        }
    }
}

impl ChannelTransport for SshTransport {
    fn execute<'a>(&'a self, request: ChannelRequest<'a>) -> TransportFuture<'a> {
        match request.descriptor.mode() {
            ConnectivityMode::Direct => self.direct.execute(request),
            ConnectivityMode::Proxied => self.proxied.execute(request),
        }
    }
}
