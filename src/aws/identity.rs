//! AWS application identity: an IAM role with a caller-supplied trust
//! policy.

use serde_json::Value;
use tracing::{debug, info};

use super::AwsIamApi;
use crate::config::ActiveCloud;
use crate::context::OpContext;
use crate::error::{Error, Result};

/// Per-cloud view of an identity record. Translation to and from the
/// record is symmetric: what create writes is what a later read sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsIdentityConfig {
    pub id: Option<String>,
    pub name: String,
    pub assume_role_policy: String,
    pub role_arn: Option<String>,
}

/// Create the IAM role. The trust policy is validated and normalized
/// before any network call; on success the role name becomes the id and
/// the ARN is captured as an output.
pub async fn create_application_identity(
    ctx: &OpContext,
    config: &mut AwsIdentityConfig,
    client: &dyn AwsIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let trust_policy = normalize_policy_json(&config.assume_role_policy)?;

    let role = client
        .create_role(&config.name, &trust_policy)
        .await
        .map_err(|e| Error::cloud(ActiveCloud::Aws, "create-role", &config.name, e))?;

    config.id = Some(role.role_name);
    config.role_arn = Some(role.arn);
    config.assume_role_policy = trust_policy;

    info!(role = %config.name, arn = ?config.role_arn, "created IAM role");
    Ok(())
}

/// Role names are immutable and no fields are refreshed on read; both
/// read and update are deliberate no-ops.
pub async fn read_application_identity(
    _ctx: &OpContext,
    _config: &mut AwsIdentityConfig,
    _client: &dyn AwsIamApi,
) -> Result<()> {
    Ok(())
}

pub async fn update_application_identity(
    _ctx: &OpContext,
    _config: &mut AwsIdentityConfig,
    _client: &dyn AwsIamApi,
) -> Result<()> {
    Ok(())
}

/// Delete the role by its stored name. A role that is already gone is
/// treated as deleted.
pub async fn delete_application_identity(
    ctx: &OpContext,
    config: &mut AwsIdentityConfig,
    client: &dyn AwsIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let name = config.id.clone().unwrap_or_else(|| config.name.clone());
    match client.delete_role(&name).await {
        Ok(()) => {
            info!(role = %name, "deleted IAM role");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(role = %name, "role already deleted");
            Ok(())
        }
        Err(e) => Err(Error::cloud(ActiveCloud::Aws, "delete-role", name, e)),
    }
}

fn normalize_policy_json(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(Error::Validation(
            "aws.assume_role_policy is required".to_string(),
        ));
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        Error::Validation(format!("aws.assume_role_policy is not valid JSON: {e}"))
    })?;
    serde_json::to_string(&value)
        .map_err(|e| Error::Validation(format!("aws.assume_role_policy: {e}")))
}
