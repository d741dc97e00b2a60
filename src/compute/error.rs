//! Error types for control-plane calls.

use std::fmt;

use thiserror::Error;

use crate::auth::AuthError;

/// Errors raised by [`super::ComputeApi`] implementations.
///
/// Every variant names the attempted operation and the resource it targeted
/// so callers can render an actionable message.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// Raised when the request could not be sent or the response not read.
    #[error("{operation} {resource}: request failed: {message}")]
    Http {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
        /// Transport error text.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{operation} {resource}: API returned {status}: {message}")]
    Api {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
        /// HTTP status code.
        status: u16,
        /// Error message reported by the API.
        message: String,
    },
    /// Raised when a long-running operation completes with errors.
    #[error("{operation} {resource}: operation failed: {message}")]
    Operation {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
        /// Joined operation error messages.
        message: String,
    },
    /// Raised when a long-running operation does not finish in time.
    #[error("{operation} {resource}: operation did not complete")]
    OperationTimeout {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("{operation} {resource}: invalid response: {message}")]
    Decode {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
        /// Decoder error text.
        message: String,
    },
    /// Raised when no bearer credential could be obtained.
    #[error("{operation} {resource}: {source}")]
    Auth {
        /// Operation being attempted.
        operation: String,
        /// Resource targeted by the operation.
        resource: String,
        /// Underlying credential failure.
        source: AuthError,
    },
}

impl ComputeError {
    /// Returns the operation name carried by the error.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Http { operation, .. }
            | Self::Api { operation, .. }
            | Self::Operation { operation, .. }
            | Self::OperationTimeout { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Auth { operation, .. } => operation,
        }
    }
}

/// Operation name and resource of an in-flight call, used to label errors.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CallContext<'a> {
    pub(crate) operation: &'static str,
    pub(crate) resource: &'a str,
}

impl<'a> CallContext<'a> {
    pub(crate) const fn new(operation: &'static str, resource: &'a str) -> Self {
        Self {
            operation,
            resource,
        }
    }

    pub(crate) fn http(self, message: &impl fmt::Display) -> ComputeError {
        ComputeError::Http {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
            message: message.to_string(),
        }
    }

    pub(crate) fn api(self, status: u16, message: String) -> ComputeError {
        ComputeError::Api {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
            status,
            message,
        }
    }

    pub(crate) fn operation_failed(self, message: String) -> ComputeError {
        ComputeError::Operation {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
            message,
        }
    }

    pub(crate) fn operation_timeout(self) -> ComputeError {
        ComputeError::OperationTimeout {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
        }
    }

    pub(crate) fn decode(self, message: &impl fmt::Display) -> ComputeError {
        ComputeError::Decode {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
            message: message.to_string(),
        }
    }

    pub(crate) fn auth(self, source: AuthError) -> ComputeError {
        ComputeError::Auth {
            operation: self.operation.to_owned(),
            resource: self.resource.to_owned(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_names_operation_and_resource() {
        let err = CallContext::new("instances.insert", "box-1")
            .api(409, String::from("already exists"));
        assert_eq!(err.operation(), "instances.insert");
        assert_eq!(
            err.to_string(),
            "instances.insert box-1: API returned 409: already exists"
        );
    }
}
