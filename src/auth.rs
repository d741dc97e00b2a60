//! Bearer credentials for the control-plane API.
//!
//! Credential acquisition is delegated: either a token supplied through
//! configuration or whatever `gcloud auth print-access-token` returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;

/// Reuse window for tokens obtained from the gcloud CLI. Access tokens are
/// issued for an hour.
const CLI_TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Future returned by [`TokenSource::token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AuthError>> + Send + 'a>>;

/// Produces bearer tokens for API requests.
pub trait TokenSource: Send + Sync {
    /// Returns a currently valid bearer token.
    fn token(&self) -> TokenFuture<'_>;
}

/// Errors raised while obtaining a credential.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    /// Raised when the credential helper cannot be executed.
    #[error("failed to run {program}: {message}")]
    Spawn {
        /// Helper program.
        program: String,
        /// Spawn error text.
        message: String,
    },
    /// Raised when the credential helper exits unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    Helper {
        /// Helper program.
        program: String,
        /// Exit status code, `-1` when terminated by a signal.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the credential is empty.
    #[error("access token is empty; run `gcloud auth login` or set GANTRY_ACCESS_TOKEN")]
    Empty,
}

/// Token fixed at construction time.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wraps a pre-issued bearer token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let token = self.token.trim();
            if token.is_empty() {
                return Err(AuthError::Empty);
            }
            Ok(token.to_owned())
        })
    }
}

/// Token obtained from the gcloud CLI and cached for a bounded window.
#[derive(Debug)]
pub struct GcloudCliToken {
    program: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl GcloudCliToken {
    /// Uses the given gcloud executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.cached.lock().ok()?;
        guard
            .as_ref()
            .filter(|(_, issued)| issued.elapsed() < CLI_TOKEN_TTL)
            .map(|(token, _)| token.clone())
    }

    fn store(&self, token: &str) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some((token.to_owned(), Instant::now()));
        }
    }

    async fn fetch(&self) -> Result<String, AuthError> {
        tracing::debug!(program = %self.program, "requesting access token");
        let output = Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|err| AuthError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(AuthError::Helper {
                program: self.program.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if token.is_empty() {
            return Err(AuthError::Empty);
        }
        Ok(token)
    }
}

impl TokenSource for GcloudCliToken {
    fn token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            if let Some(token) = self.cached_token() {
                return Ok(token);
            }
            let token = self.fetch().await?;
            self.store(&token);
            Ok(token)
        })
    }
}
