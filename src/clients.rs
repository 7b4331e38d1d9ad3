//! Shared surface for injected cloud API ports.
//!
//! Real clients (HTTP/SDK transport, credential acquisition, token
//! refresh) are constructed by the host and passed in as trait objects.
//! Every port speaks [`CloudApiError`] so the per-cloud adapters can
//! classify failures without depending on any vendor SDK type.

use std::fmt;

/// Result type returned by every injected cloud port.
pub type ApiResult<T> = std::result::Result<T, CloudApiError>;

/// A failure reported by a cloud API call, reduced to what the adapters
/// need for classification: HTTP status (when there was a response), an
/// optional service error code, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudApiError {
    /// HTTP status of the response, if one was received.
    pub status: Option<u16>,
    /// Service-specific error code, e.g. `NoSuchEntity`.
    pub code: Option<String>,
    /// Human-readable description, including the service's error payload.
    pub message: String,
    /// Set by the client for transport-level failures (timeouts,
    /// connection resets) that are safe to retry blindly.
    pub retryable: bool,
}

impl CloudApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
            retryable: false,
        }
    }

    /// A transport-level failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(message, 404)
    }

    /// GCP reports a concurrent change to the project policy as 409
    /// ("concurrent policy changes") or 412 (precondition failed).
    pub fn is_conflict(&self) -> bool {
        matches!(self.status, Some(409) | Some(412))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Azure's authorization subsystem rejects assignments for a service
    /// principal it cannot see yet with a scoped 400; the payload names
    /// `PrincipalNotFound`. This clears once propagation catches up.
    pub fn is_principal_not_found(&self) -> bool {
        self.status == Some(400)
            && (self.message.contains("PrincipalNotFound")
                || self.code.as_deref() == Some("PrincipalNotFound"))
    }
}

impl fmt::Display for CloudApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (http {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CloudApiError {}
