//! GCP adapter: service accounts as identities, bindings in the shared
//! project IAM policy as permissions.

mod identity;
mod permission;
pub mod policy;

pub use identity::{
    create_application_identity, delete_application_identity, read_application_identity,
    update_application_identity, GcpIdentityConfig,
};
pub use permission::{
    create_application_permission, delete_application_permission, parse_permission_id,
    permission_id, read_application_permission, update_application_permission,
    GcpPermissionConfig,
};

use async_trait::async_trait;

use crate::clients::ApiResult;
use policy::PolicyDocument;

/// A service account as returned by the IAM API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcpServiceAccount {
    pub email: String,
    pub display_name: String,
}

/// Service-account surface of the IAM API. Resource names are
/// `projects/{project}/serviceAccounts/{email}`.
#[async_trait]
pub trait GcpIamApi: Send + Sync {
    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> ApiResult<GcpServiceAccount>;
    async fn get_service_account(&self, resource_name: &str) -> ApiResult<GcpServiceAccount>;
    async fn patch_service_account(
        &self,
        resource_name: &str,
        display_name: &str,
    ) -> ApiResult<GcpServiceAccount>;
    async fn delete_service_account(&self, resource_name: &str) -> ApiResult<()>;

    /// The service account's own IAM policy: a per-resource document,
    /// not the shared project policy.
    async fn get_service_account_iam_policy(
        &self,
        resource_name: &str,
    ) -> ApiResult<PolicyDocument>;
    async fn set_service_account_iam_policy(
        &self,
        resource_name: &str,
        policy: &PolicyDocument,
    ) -> ApiResult<PolicyDocument>;
}

/// Project-level IAM policy surface of the Resource Manager API. The
/// document returned here is shared by every permission resource scoped
/// to the project.
#[async_trait]
pub trait GcpResourceManagerApi: Send + Sync {
    async fn get_project_iam_policy(
        &self,
        project: &str,
        requested_version: i32,
    ) -> ApiResult<PolicyDocument>;
    /// Replaces the entire document; there is no partial-binding update.
    async fn set_project_iam_policy(
        &self,
        project: &str,
        policy: &PolicyDocument,
    ) -> ApiResult<PolicyDocument>;
}
