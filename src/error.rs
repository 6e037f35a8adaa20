//! Error types for the promotion engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a remote service adapter.
///
/// Adapters return this from capability calls; the core wraps it with the
/// service and group that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The requested group (tag, target, test job) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or protocol failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Authentication or authorization failure.
    #[error("access denied: {0}")]
    Denied(String),

    /// The call did not finish within the configured timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled before the call was issued.
    #[error("cancelled before the call was issued")]
    Cancelled,

    /// Any other adapter-specific failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::TimedOut(_))
    }
}

/// Result type for adapter calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A group template is malformed or cannot be resolved.
    #[error("template '{template}': {reason}")]
    Template { template: String, reason: String },

    /// Two services were registered under the same name.
    #[error("duplicate service '{0}'")]
    DuplicateService(String),

    /// No service with this name is registered.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// The service does not provide the requested capability.
    #[error("service '{service}' does not provide the {capability} capability")]
    Capability { service: String, capability: String },

    /// Two phases were registered under the same name.
    #[error("duplicate phase '{0}'")]
    DuplicatePhase(String),

    /// No phase with this name is registered.
    #[error("unknown phase '{0}'")]
    UnknownPhase(String),

    /// A phase binding does not match the service registry.
    #[error("phase '{phase}' {binding} binding: {reason}")]
    PhaseBinding {
        phase: String,
        binding: String,
        reason: String,
    },

    /// The requested action needs a binding the phase does not declare.
    #[error("phase '{phase}' has no {binding} binding")]
    MissingBinding { phase: String, binding: String },

    /// Reading a package group or test result failed.
    #[error("query of '{group}' on service '{service}' failed: {source}")]
    ServiceQuery {
        service: String,
        group: String,
        #[source]
        source: RemoteError,
    },

    /// Tagging a package failed.
    #[error("tagging {package} into '{group}' on service '{service}' failed: {source}")]
    ServiceMutation {
        service: String,
        group: String,
        package: String,
        #[source]
        source: RemoteError,
    },

    /// Malformed package identifier.
    #[error("invalid package '{0}'")]
    InvalidPackage(String),

    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A worker task panicked or was aborted before reporting.
    #[error("task aborted: {0}")]
    TaskAborted(String),

    /// Failed to render a report.
    #[error("failed to render report: {0}")]
    Render(String),
}

impl Error {
    /// Whether the error is a load/bind-time configuration problem.
    ///
    /// Configuration errors abort a run before any remote call is made.
    pub fn is_config(&self) -> bool {
        !matches!(
            self,
            Error::ServiceQuery { .. }
                | Error::ServiceMutation { .. }
                | Error::TaskAborted(_)
                | Error::Render(_)
        )
    }

    /// The underlying remote failure, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::ServiceQuery { source, .. } | Error::ServiceMutation { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
