//! Cross-cloud application identity and permission provisioning.
//!
//! Normalizes three incompatible provisioning models (AWS IAM roles,
//! Azure managed identities / service principals, GCP service accounts)
//! into two uniform resource lifecycles, identity and permission,
//! dispatched through a single resolved active cloud.
//!
//! The GCP permission path mutates a project-wide IAM policy document
//! shared by every permission resource in the project; it is written
//! with an optimistic-concurrency fetch/modify/save loop rather than a
//! lock (see [`gcp::policy`]).

pub mod aws;
pub mod azure;
pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod gcp;
pub mod record;
pub mod router;

pub use config::{ActiveCloud, ProviderSettings};
pub use context::OpContext;
pub use error::{Error, Result};
pub use record::{IdentityRecord, PermissionRecord};
pub use router::{CloudClients, CloudRouter};
