//! Error types for the network daemon
//!
//! Every failure carries an errno-class code so it can be handed back to the
//! dispatch framework as a `(code, message)` pair.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for networkd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the network daemon
#[derive(Error, Debug)]
pub enum Error {
    /// No desired record or no kernel interface
    #[error("{0}")]
    NotFound(String),

    /// Interface has no DHCP client registered
    #[error("{0}")]
    NotConfigured(String),

    /// DHCP client has never bound a lease
    #[error("{0}")]
    NoLease(String),

    /// Bad type name, malformed tag, address that does not parse
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No free clone name left
    #[error("{0}")]
    Busy(String),

    /// Kernel-level mutation failed
    #[error("{message}")]
    Os {
        /// errno reported by the kernel capability
        errno: i32,
        /// Human readable description
        message: String,
    },

    /// DHCP server rejected the request
    #[error("DHCP request rejected: {0}")]
    ProtocolRejected(String),

    /// No DHCP lease within the startup timeout
    #[error("{0}")]
    Unreachable(String),

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Desired-state source errors
    #[error("Datastore error: {0}")]
    Store(String),

    /// Resolver tool errors
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// RPC / event bus errors
    #[error("Dispatcher error: {0}")]
    Dispatch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a "not configured" error
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a kernel-level failure
    pub fn os(errno: i32, msg: impl Into<String>) -> Self {
        Self::Os {
            errno,
            message: msg.into(),
        }
    }

    /// Create a datastore error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a resolver error
    pub fn resolver(msg: impl Into<String>) -> Self {
        Self::Resolver(msg.into())
    }

    /// Create a dispatcher error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// errno-class code of this error
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::NotConfigured(_) => libc::ENXIO,
            Error::NoLease(_) => libc::ENOENT,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::Busy(_) => libc::EBUSY,
            Error::Os { errno, .. } => *errno,
            Error::ProtocolRejected(_) => libc::EACCES,
            Error::Unreachable(_) => libc::ENETUNREACH,
            Error::Timeout(_) => libc::ETIMEDOUT,
            Error::Config(_) | Error::Json(_) => libc::EINVAL,
            Error::Store(_) | Error::Resolver(_) | Error::Dispatch(_) | Error::Other(_) => {
                libc::EFAULT
            }
        }
    }

    /// Whether this error came from a kernel mutation
    pub fn is_os(&self) -> bool {
        matches!(self, Error::Os { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Os {
            errno: err.raw_os_error().unwrap_or(libc::EIO),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// A best-effort failure reported by a reconciliation step
///
/// Reconciliation keeps going after a step fails; the failures are collected
/// in order and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// errno-class code
    pub code: i32,
    /// Description including the interface or route involved
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap an error with a context prefix
    pub fn from_error(context: impl std::fmt::Display, err: &Error) -> Self {
        Self::new(err.errno(), format!("{}: {}", context, err))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.code, self.message)
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Self {
        Self::new(err.errno(), err.to_string())
    }
}
