//! Cloud-agnostic resource records exchanged with the host framework.
//!
//! Records are plain string-typed fields: required inputs, one optional
//! nested block per cloud, and computed outputs filled in after the
//! cloud call. Schema validation and state persistence belong to the
//! host; the router only checks that the block matching the active cloud
//! is present.

use serde::{Deserialize, Serialize};

use crate::gcp::policy::Expr;

/// An application identity: one cloud principal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Cloud-assigned identifier; stable after create, round-trips
    /// through read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// User-supplied name. Immutable: changing it means destroy and
    /// recreate.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsIdentityBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureIdentityBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpIdentityBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsIdentityBlock {
    /// Trust policy attached to the role. Must be valid JSON; it is
    /// normalized before the role is created.
    pub assume_role_policy: String,
    /// Computed: ARN of the created role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

/// Azure identities come in two shapes. When `resource_group_name` and
/// `location` are set the identity is a user-assigned managed identity
/// (optionally federated to a Kubernetes service account); when both are
/// absent it is an Application + Service Principal with a generated
/// client secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureIdentityBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    // Workload identity federation triple (managed-identity shape only);
    // all three or none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer_url: Option<String>,

    // Computed outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_id: Option<String>,
    /// Computed (application shape): the generated secret. Visible only
    /// in the create response; it cannot be re-read later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpIdentityBlock {
    // Workload identity pair; both or none. The OIDC issuer is implied
    // by the project (`{project}.svc.id.goog`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_service_account: Option<String>,

    /// Computed: email of the created service account (also the record
    /// id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
}

/// An application permission: a binding of one identity to an
/// authorization scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPermissionBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzurePermissionBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpPermissionBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsPermissionBlock {
    /// Name of the IAM role created by the identity lifecycle.
    pub role_name: String,
    /// Managed policy to attach.
    pub policy_arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzurePermissionBlock {
    /// Scope of the assignment, e.g. a subscription or resource group
    /// resource id.
    pub scope: String,
    /// Display name of the role definition, resolved at the scope.
    pub role_definition_name: String,
    /// Object id of the principal created by the identity lifecycle.
    pub principal_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpPermissionBlock {
    /// Project whose shared policy holds the binding; defaults to the
    /// provider's project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Role to grant, e.g. `roles/redis.viewer`.
    pub role: String,
    /// Service account email of the member.
    pub member: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_record_round_trips_and_skips_empty_blocks() {
        let record = IdentityRecord {
            id: Some("svc-a".to_string()),
            name: "svc-a".to_string(),
            aws: Some(AwsIdentityBlock {
                assume_role_policy: "{}".to_string(),
                role_arn: Some("arn:aws:iam::123456789012:role/svc-a".to_string()),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("azure"));
        assert!(!json.contains("gcp"));
        let back: IdentityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn permission_record_parses_minimal_gcp_block() {
        let json = r#"{"gcp":{"role":"roles/redis.viewer","member":"svc@proj.iam.gserviceaccount.com"}}"#;
        let record: PermissionRecord = serde_json::from_str(json).unwrap();
        let gcp = record.gcp.unwrap();
        assert_eq!(gcp.role, "roles/redis.viewer");
        assert!(gcp.project.is_none());
        assert!(gcp.condition.is_none());
    }
}
