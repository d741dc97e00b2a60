//! Command-channel transports.
//!
//! The provisioning core never spawns `ssh` itself: it hands a
//! [`ChannelRequest`] to a [`ChannelTransport`]. [`SshTransport`] is the real
//! implementation and dispatches to [`DirectSsh`] or [`ProxiedSsh`] by the
//! descriptor's mode; tests use [`crate::test_support::ScriptedTransport`].

mod ssh;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::descriptor::ConnectivityDescriptor;
use crate::request::ConnectivityMode;

pub use ssh::{DirectSsh, ProxiedSsh, SshTransport, ssh_args};

/// Exit status the `ssh` client reserves for its own failures.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Standard stream handling for a channel invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelIo {
    /// Share the caller's stdin, stdout, and stderr verbatim.
    Inherit,
    /// Discard all output and provide no input.
    Silent,
}

/// One remote command to run over a descriptor's channel.
#[derive(Clone, Copy, Debug)]
pub struct ChannelRequest<'a> {
    /// Descriptor of the target instance.
    pub descriptor: &'a ConnectivityDescriptor,
    /// Remote command line.
    pub command: &'a str,
    /// Stream handling.
    pub io: ChannelIo,
    /// Overrides the descriptor's connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl<'a> ChannelRequest<'a> {
    /// Runs `command` with inherited stdio.
    #[must_use]
    pub const fn interactive(descriptor: &'a ConnectivityDescriptor, command: &'a str) -> Self {
        Self {
            descriptor,
            command,
            io: ChannelIo::Inherit,
            connect_timeout: None,
        }
    }

    /// Runs `command` silently with a short connect timeout.
    #[must_use]
    pub const fn probe(
        descriptor: &'a ConnectivityDescriptor,
        command: &'a str,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            command,
            io: ChannelIo::Silent,
            connect_timeout: Some(connect_timeout),
        }
    }
}

/// How a channel invocation ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelExit {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ChannelExit {
    /// Wraps an exit code.
    #[must_use]
    pub const fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Returns whether the remote command succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns whether the channel itself failed rather than the remote
    /// command.
    #[must_use]
    pub const fn is_transport_failure(self) -> bool {
        matches!(self.code, Some(SSH_TRANSPORT_FAILURE))
    }
}

/// Errors raised before a channel invocation produced an exit status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the client process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Client program.
        program: String,
        /// Spawn error text.
        message: String,
    },
    /// Raised when waiting on the client process fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Client program.
        program: String,
        /// Wait error text.
        message: String,
    },
    /// Raised when a transport receives a descriptor for the other mode.
    #[error("{transport} transport cannot use a {found:?} descriptor")]
    ModeMismatch {
        /// Transport name.
        transport: &'static str,
        /// Mode of the descriptor.
        found: ConnectivityMode,
    },
}

/// Future returned by [`ChannelTransport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChannelExit, TransportError>> + Send + 'a>>;

/// Runs a single remote command over an instance's channel.
pub trait ChannelTransport: Send + Sync {
    /// Executes the request and reports how it ended.
    fn execute<'a>(&'a self, request: ChannelRequest<'a>) -> TransportFuture<'a>;
}
