//! Azure adapter. Identities come in two shapes: a user-assigned managed
//! identity (ARM) or an AD application with a service principal and
//! client secret (Microsoft Graph). Permissions are role assignments.

mod identity;
mod permission;

pub use identity::{
    create_application_identity, delete_application_identity, read_application_identity,
    update_application_identity, AzureIdentityConfig, AzureIdentityShape, KubernetesFederation,
};
pub use permission::{
    create_application_permission, delete_application_permission, read_application_permission,
    update_application_permission, AzurePermissionConfig,
};

use async_trait::async_trait;

use crate::clients::ApiResult;

/// A user-assigned managed identity as returned by ARM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureManagedIdentity {
    pub principal_id: String,
    pub client_id: String,
    pub tenant_id: String,
    /// Full ARM resource id of the identity.
    pub resource_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureApplication {
    pub object_id: String,
    pub app_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureServicePrincipal {
    pub object_id: String,
    pub app_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzurePasswordCredential {
    pub key_id: String,
    pub secret_text: String,
    /// RFC 3339 expiry of the secret.
    pub end_date_time: String,
}

/// An OIDC trust from a Kubernetes service account to an identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FederatedCredential {
    pub issuer: String,
    pub subject: String,
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureRoleDefinition {
    /// Fully qualified role definition id.
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureRoleAssignment {
    /// Fully qualified assignment id, scope included.
    pub id: String,
    /// The GUID segment of the id.
    pub name: String,
}

#[async_trait]
pub trait AzureManagedIdentityApi: Send + Sync {
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> ApiResult<AzureManagedIdentity>;
    async fn get(&self, resource_group: &str, name: &str) -> ApiResult<AzureManagedIdentity>;
    async fn delete(&self, resource_group: &str, name: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait AzureFederatedCredentialApi: Send + Sync {
    /// Upserts the named credential under the managed identity.
    async fn create_or_update(
        &self,
        resource_group: &str,
        identity_name: &str,
        credential_name: &str,
        credential: &FederatedCredential,
    ) -> ApiResult<()>;
}

/// Microsoft Graph surface for the application identity shape.
#[async_trait]
pub trait AzureGraphApi: Send + Sync {
    async fn create_application(&self, display_name: &str) -> ApiResult<AzureApplication>;
    async fn delete_application(&self, object_id: &str) -> ApiResult<()>;
    async fn create_service_principal(&self, app_id: &str) -> ApiResult<AzureServicePrincipal>;
    async fn get_service_principal(&self, object_id: &str) -> ApiResult<AzureServicePrincipal>;
    async fn add_password(
        &self,
        application_object_id: &str,
        display_name: &str,
        end_date_time: &str,
    ) -> ApiResult<AzurePasswordCredential>;
}

#[async_trait]
pub trait AzureAuthorizationApi: Send + Sync {
    /// Role definitions at the scope matching an OData `$filter`.
    async fn list_role_definitions(
        &self,
        scope: &str,
        filter: &str,
    ) -> ApiResult<Vec<AzureRoleDefinition>>;
    /// Fetch the authoritative definition by its fully qualified id.
    async fn get_role_definition(
        &self,
        scope: &str,
        definition_id: &str,
    ) -> ApiResult<AzureRoleDefinition>;
    async fn create_role_assignment(
        &self,
        scope: &str,
        assignment_name: &str,
        role_definition_id: &str,
        principal_id: &str,
    ) -> ApiResult<AzureRoleAssignment>;
    /// Deletes by fully qualified assignment id.
    async fn delete_role_assignment(&self, assignment_id: &str) -> ApiResult<()>;
}
