//! Centralized error types for the Magellan discovery library.
//!
//! This module provides a unified error handling system built on `thiserror`,
//! mirroring the result-code surface of the original implementation
//! (`MAGELLAN_RESULT_*`) without exposing a C-ABI.

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::fetch::FetchError;

/// Trait for error types that provide machine-readable error codes, matching
/// the integer result codes a host application might still want to log.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::MdnsDaemon(_) => "mdns_daemon_failed",
        }
    }
}

impl ErrorCode for FetchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_) => "http_error_status",
            Self::Parse(_) => "config_parse_error",
            Self::Tls(_) => "tls_configuration_error",
        }
    }
}

/// Application-wide error type for the Magellan core library.
///
/// Variants intentionally mirror `MAGELLAN_RESULT_*` from the original C-ABI
/// so a host application's logs read the same way even though this crate
/// returns `Result<T, MagellanError>` rather than an integer code.
#[derive(Debug, Error)]
pub enum MagellanError {
    /// A caller supplied parameters that fail validation (e.g. an empty
    /// discoverer key, a malformed URL).
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// An operation was attempted before `initialize` completed.
    #[error("session not initialized")]
    NotInitialized,

    /// `initialize` was called on a session that is already running.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// Discovery transport failure (SSDP socket, mDNS daemon).
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Configuration fetch failure (HTTPS, TLS, malformed body).
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Unclassified internal failure. Used sparingly, for conditions the
    /// data model doesn't otherwise name (e.g. a poisoned internal lock).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MagellanError {
    /// Returns a machine-readable error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::Discovery(e) => e.code(),
            Self::Fetch(e) => e.code(),
            Self::Internal(_) => "general_failure",
        }
    }
}

/// Convenient Result alias for core library operations.
pub type MagellanResult<T> = Result<T, MagellanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_initialized_has_stable_code() {
        let err = MagellanError::NotInitialized;
        assert_eq!(err.code(), "not_initialized");
    }

    #[test]
    fn already_initialized_has_stable_code() {
        let err = MagellanError::AlreadyInitialized;
        assert_eq!(err.code(), "already_initialized");
    }

    #[test]
    fn invalid_parameters_carries_message() {
        let err = MagellanError::InvalidParameters("empty discoverer key".into());
        assert_eq!(err.code(), "invalid_parameters");
        assert!(err.to_string().contains("empty discoverer key"));
    }
}
