//! AWS application permission: a managed-policy attachment on a role.
//!
//! Attach and detach are single-object, cloud-side idempotent calls;
//! there is no shared-document risk here and no retry.

use tracing::{debug, info};

use super::AwsIamApi;
use crate::config::ActiveCloud;
use crate::context::OpContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsPermissionConfig {
    pub id: Option<String>,
    pub role_name: String,
    pub policy_arn: String,
}

/// Composite id for an attachment. Role names cannot contain `/`, so the
/// first separator splits the pair back apart.
pub fn attachment_id(role_name: &str, policy_arn: &str) -> String {
    format!("{role_name}/{policy_arn}")
}

pub async fn create_application_permission(
    ctx: &OpContext,
    config: &mut AwsPermissionConfig,
    client: &dyn AwsIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    client
        .attach_role_policy(&config.role_name, &config.policy_arn)
        .await
        .map_err(|e| {
            Error::cloud(
                ActiveCloud::Aws,
                "attach-role-policy",
                &config.role_name,
                e,
            )
        })?;

    config.id = Some(attachment_id(&config.role_name, &config.policy_arn));
    info!(role = %config.role_name, policy = %config.policy_arn, "attached role policy");
    Ok(())
}

/// Attachments carry no server-assigned state to refresh.
pub async fn read_application_permission(
    _ctx: &OpContext,
    _config: &mut AwsPermissionConfig,
    _client: &dyn AwsIamApi,
) -> Result<()> {
    Ok(())
}

pub async fn update_application_permission(
    _ctx: &OpContext,
    _config: &mut AwsPermissionConfig,
    _client: &dyn AwsIamApi,
) -> Result<()> {
    Ok(())
}

/// Detach the pair. Best-effort: if the role or attachment is already
/// gone (identity destroyed out-of-band), deletion succeeds.
pub async fn delete_application_permission(
    ctx: &OpContext,
    config: &mut AwsPermissionConfig,
    client: &dyn AwsIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    match client
        .detach_role_policy(&config.role_name, &config.policy_arn)
        .await
    {
        Ok(()) => {
            info!(role = %config.role_name, policy = %config.policy_arn, "detached role policy");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(role = %config.role_name, "attachment already gone");
            Ok(())
        }
        Err(e) => Err(Error::cloud(
            ActiveCloud::Aws,
            "detach-role-policy",
            config.role_name.clone(),
            e,
        )),
    }
}
