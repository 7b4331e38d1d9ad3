//! AWS adapter: IAM roles as identities, managed-policy attachments as
//! permissions.

mod identity;
mod permission;

pub use identity::{
    create_application_identity, delete_application_identity, read_application_identity,
    update_application_identity, AwsIdentityConfig,
};
pub use permission::{
    create_application_permission, delete_application_permission, read_application_permission,
    update_application_permission, AwsPermissionConfig,
};

use async_trait::async_trait;

use crate::clients::ApiResult;

/// An IAM role as returned by role creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AwsRole {
    pub role_name: String,
    pub arn: String,
}

/// Minimal IAM surface the adapter needs. The host constructs the real
/// SDK-backed client; tests substitute scripted fakes.
#[async_trait]
pub trait AwsIamApi: Send + Sync {
    async fn create_role(&self, role_name: &str, assume_role_policy: &str) -> ApiResult<AwsRole>;
    async fn delete_role(&self, role_name: &str) -> ApiResult<()>;
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ApiResult<()>;
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ApiResult<()>;
}
