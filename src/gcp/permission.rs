//! GCP permission bindings on the project IAM policy.
//!
//! Both grant and revoke go through [`mutate_project_policy`] so every
//! attempt re-derives its edit from a fresh fetch of the shared policy.

use tracing::info;

use super::policy::{add_to_policy, mutate_project_policy, remove_from_policy, Expr};
use super::GcpResourceManagerApi;
use crate::context::OpContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcpPermissionConfig {
    /// `{member}/{role}` once granted.
    pub id: Option<String>,
    pub project: String,
    pub role: String,
    pub member: String,
    pub condition: Option<Expr>,
}

/// Canonical permission id. The member segment never contains `/`, so
/// the first separator splits the pair back apart.
pub fn permission_id(member: &str, role: &str) -> String {
    format!("{member}/{role}")
}

pub fn parse_permission_id(id: &str) -> Result<(String, String)> {
    id.split_once('/')
        .filter(|(member, role)| !member.is_empty() && !role.is_empty())
        .map(|(member, role)| (member.to_string(), role.to_string()))
        .ok_or_else(|| Error::Validation(format!("malformed gcp permission id '{id}'")))
}

/// Prefix a bare service account email into a policy member string.
/// Already-prefixed members pass through unchanged.
pub fn member_string(member: &str) -> String {
    if member.contains(':') {
        member.to_string()
    } else {
        format!("serviceAccount:{member}")
    }
}

pub async fn create_application_permission(
    ctx: &OpContext,
    config: &mut GcpPermissionConfig,
    client: &dyn GcpResourceManagerApi,
) -> Result<()> {
    let member = member_string(&config.member);
    let role = config.role.clone();
    let condition = config.condition.clone();

    mutate_project_policy(ctx, client, &config.project, |policy| {
        add_to_policy(policy, &role, &member, condition.as_ref());
    })
    .await?;

    config.id = Some(permission_id(&member, &config.role));
    info!(project = %config.project, role = %config.role, member = %member, "granted project role");
    Ok(())
}

/// The policy read happens implicitly on the next mutation; there is no
/// per-binding resource to refresh.
pub async fn read_application_permission(
    ctx: &OpContext,
    _config: &mut GcpPermissionConfig,
    _client: &dyn GcpResourceManagerApi,
) -> Result<()> {
    ctx.check_cancelled()
}

/// Role, member and condition are all part of the binding's identity, so
/// an in-place update has nothing left to change.
pub async fn update_application_permission(
    ctx: &OpContext,
    _config: &mut GcpPermissionConfig,
    _client: &dyn GcpResourceManagerApi,
) -> Result<()> {
    ctx.check_cancelled()
}

pub async fn delete_application_permission(
    ctx: &OpContext,
    config: &mut GcpPermissionConfig,
    client: &dyn GcpResourceManagerApi,
) -> Result<()> {
    let (member, role) = match &config.id {
        Some(id) => parse_permission_id(id)?,
        None => (member_string(&config.member), config.role.clone()),
    };
    let condition = config.condition.clone();

    mutate_project_policy(ctx, client, &config.project, |policy| {
        remove_from_policy(policy, &role, &member, condition.as_ref());
    })
    .await?;

    info!(project = %config.project, role = %role, member = %member, "revoked project role");
    Ok(())
}
