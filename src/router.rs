//! Cross-cloud dispatch.
//!
//! The router binds one resolved cloud to one set of clients at
//! construction. Each lifecycle operation translates the cloud-agnostic
//! record into the adapter's config, runs the adapter once, and copies
//! computed outputs back into the record. Dispatch happens here and
//! nowhere else.

use std::sync::Arc;

use crate::aws::{AwsIamApi, AwsIdentityConfig, AwsPermissionConfig};
use crate::azure::{
    AzureAuthorizationApi, AzureFederatedCredentialApi, AzureGraphApi, AzureIdentityConfig,
    AzureIdentityShape, AzureManagedIdentityApi, AzurePermissionConfig, KubernetesFederation,
};
use crate::config::{ActiveCloud, ProviderSettings};
use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::gcp::{
    GcpIamApi, GcpIdentityConfig, GcpPermissionConfig, GcpResourceManagerApi,
};
use crate::record::{IdentityRecord, PermissionRecord};

pub struct AwsClients {
    pub iam: Arc<dyn AwsIamApi>,
}

pub struct AzureClients {
    pub managed_identities: Arc<dyn AzureManagedIdentityApi>,
    pub federated_credentials: Arc<dyn AzureFederatedCredentialApi>,
    pub graph: Arc<dyn AzureGraphApi>,
    pub authorization: Arc<dyn AzureAuthorizationApi>,
}

pub struct GcpClients {
    pub iam: Arc<dyn GcpIamApi>,
    pub resource_manager: Arc<dyn GcpResourceManagerApi>,
}

/// The client bundle for exactly one cloud.
pub enum CloudClients {
    Aws(AwsClients),
    Azure(AzureClients),
    Gcp(GcpClients),
}

impl CloudClients {
    fn cloud(&self) -> ActiveCloud {
        match self {
            CloudClients::Aws(_) => ActiveCloud::Aws,
            CloudClients::Azure(_) => ActiveCloud::Azure,
            CloudClients::Gcp(_) => ActiveCloud::Gcp,
        }
    }
}

pub struct CloudRouter {
    cloud: ActiveCloud,
    settings: ProviderSettings,
    clients: CloudClients,
}

impl CloudRouter {
    /// The settings must resolve to the same cloud the clients were
    /// built for.
    pub fn new(settings: ProviderSettings, clients: CloudClients) -> Result<Self> {
        let cloud = settings.resolve()?;
        if cloud != clients.cloud() {
            return Err(Error::Configuration(format!(
                "settings select {cloud} but clients were built for {}",
                clients.cloud()
            )));
        }
        Ok(Self {
            cloud,
            settings,
            clients,
        })
    }

    pub fn cloud(&self) -> ActiveCloud {
        self.cloud
    }

    pub async fn create_identity(
        &self,
        ctx: &OpContext,
        record: &mut IdentityRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_identity_config(record)?;
                crate::aws::create_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_aws_identity(record, &config);
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_identity_config(record, &self.settings)?;
                crate::azure::create_application_identity(
                    ctx,
                    &mut config,
                    clients.managed_identities.as_ref(),
                    clients.federated_credentials.as_ref(),
                    clients.graph.as_ref(),
                )
                .await?;
                apply_azure_identity(record, &config);
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_identity_config(record, &self.settings)?;
                crate::gcp::create_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_gcp_identity(record, &config);
            }
        }
        Ok(())
    }

    pub async fn read_identity(&self, ctx: &OpContext, record: &mut IdentityRecord) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_identity_config(record)?;
                crate::aws::read_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_aws_identity(record, &config);
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_identity_config(record, &self.settings)?;
                crate::azure::read_application_identity(
                    ctx,
                    &mut config,
                    clients.managed_identities.as_ref(),
                )
                .await?;
                apply_azure_identity(record, &config);
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_identity_config(record, &self.settings)?;
                crate::gcp::read_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_gcp_identity(record, &config);
            }
        }
        Ok(())
    }

    pub async fn update_identity(
        &self,
        ctx: &OpContext,
        record: &mut IdentityRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_identity_config(record)?;
                crate::aws::update_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_aws_identity(record, &config);
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_identity_config(record, &self.settings)?;
                crate::azure::update_application_identity(
                    ctx,
                    &mut config,
                    clients.managed_identities.as_ref(),
                )
                .await?;
                apply_azure_identity(record, &config);
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_identity_config(record, &self.settings)?;
                crate::gcp::update_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                apply_gcp_identity(record, &config);
            }
        }
        Ok(())
    }

    pub async fn delete_identity(
        &self,
        ctx: &OpContext,
        record: &mut IdentityRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_identity_config(record)?;
                crate::aws::delete_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_identity_config(record, &self.settings)?;
                crate::azure::delete_application_identity(
                    ctx,
                    &mut config,
                    clients.managed_identities.as_ref(),
                    clients.graph.as_ref(),
                )
                .await?;
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_identity_config(record, &self.settings)?;
                crate::gcp::delete_application_identity(ctx, &mut config, clients.iam.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn create_permission(
        &self,
        ctx: &OpContext,
        record: &mut PermissionRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_permission_config(record)?;
                crate::aws::create_application_permission(ctx, &mut config, clients.iam.as_ref())
                    .await?;
                record.id = config.id;
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_permission_config(record)?;
                crate::azure::create_application_permission(
                    ctx,
                    &mut config,
                    clients.authorization.as_ref(),
                )
                .await?;
                record.id = config.id;
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_permission_config(record, &self.settings)?;
                crate::gcp::create_application_permission(
                    ctx,
                    &mut config,
                    clients.resource_manager.as_ref(),
                )
                .await?;
                record.id = config.id;
            }
        }
        Ok(())
    }

    pub async fn read_permission(
        &self,
        ctx: &OpContext,
        record: &mut PermissionRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_permission_config(record)?;
                crate::aws::read_application_permission(ctx, &mut config, clients.iam.as_ref())
                    .await
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_permission_config(record)?;
                crate::azure::read_application_permission(
                    ctx,
                    &mut config,
                    clients.authorization.as_ref(),
                )
                .await
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_permission_config(record, &self.settings)?;
                crate::gcp::read_application_permission(
                    ctx,
                    &mut config,
                    clients.resource_manager.as_ref(),
                )
                .await
            }
        }
    }

    pub async fn update_permission(
        &self,
        ctx: &OpContext,
        record: &mut PermissionRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_permission_config(record)?;
                crate::aws::update_application_permission(ctx, &mut config, clients.iam.as_ref())
                    .await
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_permission_config(record)?;
                crate::azure::update_application_permission(
                    ctx,
                    &mut config,
                    clients.authorization.as_ref(),
                )
                .await
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_permission_config(record, &self.settings)?;
                crate::gcp::update_application_permission(
                    ctx,
                    &mut config,
                    clients.resource_manager.as_ref(),
                )
                .await
            }
        }
    }

    pub async fn delete_permission(
        &self,
        ctx: &OpContext,
        record: &mut PermissionRecord,
    ) -> Result<()> {
        match &self.clients {
            CloudClients::Aws(clients) => {
                let mut config = aws_permission_config(record)?;
                crate::aws::delete_application_permission(ctx, &mut config, clients.iam.as_ref())
                    .await
            }
            CloudClients::Azure(clients) => {
                let mut config = azure_permission_config(record)?;
                crate::azure::delete_application_permission(
                    ctx,
                    &mut config,
                    clients.authorization.as_ref(),
                )
                .await
            }
            CloudClients::Gcp(clients) => {
                let mut config = gcp_permission_config(record, &self.settings)?;
                crate::gcp::delete_application_permission(
                    ctx,
                    &mut config,
                    clients.resource_manager.as_ref(),
                )
                .await
            }
        }
    }
}

/// Check a record against the active cloud without touching the network.
pub fn validate_identity_record(
    cloud: ActiveCloud,
    settings: &ProviderSettings,
    record: &IdentityRecord,
) -> Result<()> {
    match cloud {
        ActiveCloud::Aws => aws_identity_config(record).map(|_| ()),
        ActiveCloud::Azure => azure_identity_config(record, settings).map(|_| ()),
        ActiveCloud::Gcp => gcp_identity_config(record, settings).map(|_| ()),
    }
}

pub fn validate_permission_record(
    cloud: ActiveCloud,
    settings: &ProviderSettings,
    record: &PermissionRecord,
) -> Result<()> {
    match cloud {
        ActiveCloud::Aws => aws_permission_config(record).map(|_| ()),
        ActiveCloud::Azure => azure_permission_config(record).map(|_| ()),
        ActiveCloud::Gcp => gcp_permission_config(record, settings).map(|_| ()),
    }
}

fn missing_block(kind: &str, cloud: ActiveCloud) -> Error {
    Error::Validation(format!(
        "{kind} record has no '{cloud}' block but the provider is configured for {cloud}"
    ))
}

fn aws_identity_config(record: &IdentityRecord) -> Result<AwsIdentityConfig> {
    let block = record
        .aws
        .as_ref()
        .ok_or_else(|| missing_block("identity", ActiveCloud::Aws))?;
    Ok(AwsIdentityConfig {
        id: record.id.clone(),
        name: record.name.clone(),
        assume_role_policy: block.assume_role_policy.clone(),
        role_arn: block.role_arn.clone(),
    })
}

fn apply_aws_identity(record: &mut IdentityRecord, config: &AwsIdentityConfig) {
    record.id = config.id.clone();
    if let Some(block) = record.aws.as_mut() {
        block.assume_role_policy = config.assume_role_policy.clone();
        block.role_arn = config.role_arn.clone();
    }
}

fn azure_identity_config(
    record: &IdentityRecord,
    settings: &ProviderSettings,
) -> Result<AzureIdentityConfig> {
    let block = record
        .azure
        .as_ref()
        .ok_or_else(|| missing_block("identity", ActiveCloud::Azure))?;

    let shape = match (&block.resource_group_name, &block.location) {
        (Some(resource_group), Some(location)) => {
            let federation = match (
                &block.kubernetes_namespace,
                &block.kubernetes_service_account,
                &block.oidc_issuer_url,
            ) {
                (Some(namespace), Some(service_account), Some(issuer)) => {
                    Some(KubernetesFederation {
                        namespace: namespace.clone(),
                        service_account: service_account.clone(),
                        oidc_issuer_url: issuer.clone(),
                    })
                }
                (None, None, None) => None,
                _ => {
                    return Err(Error::Validation(
                        "azure federation requires kubernetes_namespace, \
                         kubernetes_service_account and oidc_issuer_url together"
                            .to_string(),
                    ))
                }
            };
            AzureIdentityShape::ManagedIdentity {
                resource_group: resource_group.clone(),
                location: location.clone(),
                federation,
            }
        }
        (None, None) => AzureIdentityShape::Application,
        _ => {
            return Err(Error::Validation(
                "azure identity requires resource_group_name and location together, or neither"
                    .to_string(),
            ))
        }
    };

    let mut config = AzureIdentityConfig::new(record.name.clone(), shape);
    config.id = record.id.clone();
    config.client_id = block.client_id.clone();
    config.tenant_id = block
        .tenant_id
        .clone()
        .or_else(|| settings.azure.as_ref().map(|s| s.tenant_id.clone()));
    config.resource_id = block.resource_id.clone();
    config.application_id = block.application_id.clone();
    config.service_principal_id = block.service_principal_id.clone();
    config.client_secret = block.client_secret.clone();
    Ok(config)
}

fn apply_azure_identity(record: &mut IdentityRecord, config: &AzureIdentityConfig) {
    record.id = config.id.clone();
    if let Some(block) = record.azure.as_mut() {
        block.client_id = config.client_id.clone();
        block.tenant_id = config.tenant_id.clone();
        block.resource_id = config.resource_id.clone();
        block.application_id = config.application_id.clone();
        block.service_principal_id = config.service_principal_id.clone();
        block.client_secret = config.client_secret.clone();
    }
}

fn gcp_identity_config(
    record: &IdentityRecord,
    settings: &ProviderSettings,
) -> Result<GcpIdentityConfig> {
    let block = record
        .gcp
        .as_ref()
        .ok_or_else(|| missing_block("identity", ActiveCloud::Gcp))?;
    let project = settings
        .gcp
        .as_ref()
        .map(|s| s.project.clone())
        .ok_or_else(|| Error::Configuration("gcp settings are not configured".to_string()))?;

    match (&block.kubernetes_namespace, &block.kubernetes_service_account) {
        (Some(_), Some(_)) | (None, None) => {}
        _ => {
            return Err(Error::Validation(
                "gcp workload identity requires kubernetes_namespace and \
                 kubernetes_service_account together"
                    .to_string(),
            ))
        }
    }

    Ok(GcpIdentityConfig {
        id: record.id.clone(),
        name: record.name.clone(),
        project,
        kubernetes_namespace: block.kubernetes_namespace.clone(),
        kubernetes_service_account: block.kubernetes_service_account.clone(),
        service_account_email: block.service_account_email.clone(),
    })
}

fn apply_gcp_identity(record: &mut IdentityRecord, config: &GcpIdentityConfig) {
    record.id = config.id.clone();
    record.name = config.name.clone();
    if let Some(block) = record.gcp.as_mut() {
        block.service_account_email = config.service_account_email.clone();
    }
}

fn aws_permission_config(record: &PermissionRecord) -> Result<AwsPermissionConfig> {
    let block = record
        .aws
        .as_ref()
        .ok_or_else(|| missing_block("permission", ActiveCloud::Aws))?;
    Ok(AwsPermissionConfig {
        id: record.id.clone(),
        role_name: block.role_name.clone(),
        policy_arn: block.policy_arn.clone(),
    })
}

fn azure_permission_config(record: &PermissionRecord) -> Result<AzurePermissionConfig> {
    let block = record
        .azure
        .as_ref()
        .ok_or_else(|| missing_block("permission", ActiveCloud::Azure))?;
    Ok(AzurePermissionConfig {
        id: record.id.clone(),
        scope: block.scope.clone(),
        role_definition_name: block.role_definition_name.clone(),
        principal_id: block.principal_id.clone(),
    })
}

fn gcp_permission_config(
    record: &PermissionRecord,
    settings: &ProviderSettings,
) -> Result<GcpPermissionConfig> {
    let block = record
        .gcp
        .as_ref()
        .ok_or_else(|| missing_block("permission", ActiveCloud::Gcp))?;
    let project = block
        .project
        .clone()
        .or_else(|| settings.gcp.as_ref().map(|s| s.project.clone()))
        .ok_or_else(|| {
            Error::Validation("gcp permission needs a project, none set anywhere".to_string())
        })?;
    Ok(GcpPermissionConfig {
        id: record.id.clone(),
        project,
        role: block.role.clone(),
        member: block.member.clone(),
        condition: block.condition.clone(),
    })
}
