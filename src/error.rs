//! Error taxonomy for cross-cloud provisioning.
//!
//! Four classes: validation (caught before any network call where
//! possible), configuration (cloud selection), transient-after-retries,
//! and permanent cloud failures. Cloud variants keep the cloud,
//! operation, and resource identifier so callers can diagnose without
//! re-deriving context.

use thiserror::Error;

use crate::clients::CloudApiError;
use crate::config::ActiveCloud;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed required input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Zero or multiple clouds configured, or an unrecognized selector.
    #[error("provider configuration error: {0}")]
    Configuration(String),

    /// A retryable failure that exhausted its retry budget.
    #[error("{cloud} {operation} gave up after {attempts} attempts: {source}")]
    Transient {
        cloud: ActiveCloud,
        operation: &'static str,
        attempts: u32,
        #[source]
        source: CloudApiError,
    },

    /// Any other cloud API failure; surfaced immediately, no retry and no
    /// compensating action.
    #[error("{cloud} {operation} failed for '{resource}': {source}")]
    Cloud {
        cloud: ActiveCloud,
        operation: &'static str,
        resource: String,
        #[source]
        source: CloudApiError,
    },

    /// The caller cancelled the operation (including mid-backoff).
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn cloud(
        cloud: ActiveCloud,
        operation: &'static str,
        resource: impl Into<String>,
        source: CloudApiError,
    ) -> Self {
        Error::Cloud {
            cloud,
            operation,
            resource: resource.into(),
            source,
        }
    }
}
