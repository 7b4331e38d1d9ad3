//! Azure application identities.
//!
//! The managed-identity shape is a single ARM upsert plus an optional
//! federated credential. The application shape is a three-step Graph
//! sequence (application, service principal, password) that records each
//! step's output as it lands, so a re-invocation after a partial failure
//! resumes instead of duplicating.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::{
    AzureFederatedCredentialApi, AzureGraphApi, AzureManagedIdentity, AzureManagedIdentityApi,
    FederatedCredential,
};
use crate::config::ActiveCloud;
use crate::context::{
    OpContext, SERVICE_PRINCIPAL_POLL_ATTEMPTS, SERVICE_PRINCIPAL_POLL_INTERVAL,
};
use crate::error::{Error, Result};

const TOKEN_EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";
const CLIENT_SECRET_LIFETIME_DAYS: i64 = 730;

/// OIDC trust parameters for a managed identity used from Kubernetes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubernetesFederation {
    pub namespace: String,
    pub service_account: String,
    pub oidc_issuer_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AzureIdentityShape {
    ManagedIdentity {
        resource_group: String,
        location: String,
        federation: Option<KubernetesFederation>,
    },
    Application,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AzureIdentityConfig {
    /// Principal object id for a managed identity, application object id
    /// for the application shape.
    pub id: Option<String>,
    pub name: String,
    pub shape: AzureIdentityShape,
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub resource_id: Option<String>,
    pub application_id: Option<String>,
    pub service_principal_id: Option<String>,
    pub client_secret: Option<String>,
}

impl AzureIdentityConfig {
    pub fn new(name: impl Into<String>, shape: AzureIdentityShape) -> Self {
        Self {
            id: None,
            name: name.into(),
            shape,
            client_id: None,
            tenant_id: None,
            resource_id: None,
            application_id: None,
            service_principal_id: None,
            client_secret: None,
        }
    }
}

/// ARM returns the identity's resource id with a lowercase
/// `resourcegroups` segment; downstream consumers expect the canonical
/// casing.
fn normalize_resource_id(id: &str) -> String {
    id.replace("/resourcegroups/", "/resourceGroups/")
}

fn capture_managed_identity(config: &mut AzureIdentityConfig, identity: &AzureManagedIdentity) {
    config.id = Some(identity.principal_id.clone());
    config.client_id = Some(identity.client_id.clone());
    config.tenant_id = Some(identity.tenant_id.clone());
    config.resource_id = Some(normalize_resource_id(&identity.resource_id));
}

pub async fn create_application_identity(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    managed_identities: &dyn AzureManagedIdentityApi,
    federated_credentials: &dyn AzureFederatedCredentialApi,
    graph: &dyn AzureGraphApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    match config.shape.clone() {
        AzureIdentityShape::ManagedIdentity {
            resource_group,
            location,
            federation,
        } => {
            create_managed_identity(
                ctx,
                config,
                &resource_group,
                &location,
                federation.as_ref(),
                managed_identities,
                federated_credentials,
            )
            .await
        }
        AzureIdentityShape::Application => create_application(ctx, config, graph).await,
    }
}

async fn create_managed_identity(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    resource_group: &str,
    location: &str,
    federation: Option<&KubernetesFederation>,
    managed_identities: &dyn AzureManagedIdentityApi,
    federated_credentials: &dyn AzureFederatedCredentialApi,
) -> Result<()> {
    let identity = managed_identities
        .create_or_update(resource_group, &config.name, location)
        .await
        .map_err(|e| {
            Error::cloud(ActiveCloud::Azure, "create-managed-identity", &config.name, e)
        })?;
    capture_managed_identity(config, &identity);
    info!(name = %config.name, principal_id = %identity.principal_id, "created managed identity");

    if let Some(federation) = federation {
        ctx.check_cancelled()?;
        let credential = FederatedCredential {
            issuer: federation.oidc_issuer_url.clone(),
            subject: format!(
                "system:serviceaccount:{}:{}",
                federation.namespace, federation.service_account
            ),
            audiences: vec![TOKEN_EXCHANGE_AUDIENCE.to_string()],
        };
        federated_credentials
            .create_or_update(resource_group, &config.name, &config.name, &credential)
            .await
            .map_err(|e| {
                Error::cloud(ActiveCloud::Azure, "create-federated-credential", &config.name, e)
            })?;
        info!(name = %config.name, subject = %credential.subject, "created federated credential");
    }

    Ok(())
}

/// Application → service principal → password, each step skipped when its
/// output is already recorded.
async fn create_application(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    graph: &dyn AzureGraphApi,
) -> Result<()> {
    if config.application_id.is_none() {
        let app = graph.create_application(&config.name).await.map_err(|e| {
            Error::cloud(ActiveCloud::Azure, "create-application", &config.name, e)
        })?;
        info!(name = %config.name, object_id = %app.object_id, "created application");
        config.id = Some(app.object_id.clone());
        config.application_id = Some(app.object_id);
        config.client_id = Some(app.app_id);
    } else {
        debug!(name = %config.name, "application already created, resuming");
    }

    let app_id = config
        .client_id
        .clone()
        .ok_or_else(|| Error::Validation("azure application is missing its client id".to_string()))?;

    if config.service_principal_id.is_none() {
        ctx.check_cancelled()?;
        let principal = graph.create_service_principal(&app_id).await.map_err(|e| {
            Error::cloud(ActiveCloud::Azure, "create-service-principal", &config.name, e)
        })?;
        info!(name = %config.name, object_id = %principal.object_id, "created service principal");
        wait_for_service_principal(ctx, graph, &principal.object_id).await?;
        config.service_principal_id = Some(principal.object_id);
    }

    if config.client_secret.is_none() {
        ctx.check_cancelled()?;
        let application_object_id = config
            .application_id
            .clone()
            .ok_or_else(|| Error::Validation("azure application is missing its object id".to_string()))?;
        let end = (Utc::now() + Duration::days(CLIENT_SECRET_LIFETIME_DAYS)).to_rfc3339();
        let credential = graph
            .add_password(&application_object_id, &config.name, &end)
            .await
            .map_err(|e| Error::cloud(ActiveCloud::Azure, "add-password", &config.name, e))?;
        info!(name = %config.name, key_id = %credential.key_id, "added client secret");
        config.client_secret = Some(credential.secret_text);
    }

    Ok(())
}

/// A new service principal can lag behind its own creation response.
async fn wait_for_service_principal(
    ctx: &OpContext,
    graph: &dyn AzureGraphApi,
    object_id: &str,
) -> Result<()> {
    let mut last = crate::clients::CloudApiError::not_found("service principal never became visible");
    for attempt in 1..=SERVICE_PRINCIPAL_POLL_ATTEMPTS {
        ctx.check_cancelled()?;
        match graph.get_service_principal(object_id).await {
            Ok(_) => {
                debug!(object_id, attempt, "service principal visible");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                debug!(object_id, attempt, "service principal not visible yet");
                last = e;
            }
            Err(e) => {
                return Err(Error::cloud(
                    ActiveCloud::Azure,
                    "get-service-principal",
                    object_id,
                    e,
                ))
            }
        }
        if attempt < SERVICE_PRINCIPAL_POLL_ATTEMPTS {
            ctx.sleep(SERVICE_PRINCIPAL_POLL_INTERVAL).await?;
        }
    }
    Err(Error::Transient {
        cloud: ActiveCloud::Azure,
        operation: "get-service-principal",
        attempts: SERVICE_PRINCIPAL_POLL_ATTEMPTS,
        source: last,
    })
}

/// Refresh a managed identity from ARM. The application shape has no
/// drift-prone computed fields that Graph would hand back, so it is left
/// untouched.
pub async fn read_application_identity(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    managed_identities: &dyn AzureManagedIdentityApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    if let AzureIdentityShape::ManagedIdentity { resource_group, .. } = config.shape.clone() {
        let identity = managed_identities
            .get(&resource_group, &config.name)
            .await
            .map_err(|e| Error::cloud(ActiveCloud::Azure, "get-managed-identity", &config.name, e))?;
        capture_managed_identity(config, &identity);
    }
    Ok(())
}

/// Name, group and location all force replacement, so the upsert is
/// re-run only to reconcile computed fields.
pub async fn update_application_identity(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    managed_identities: &dyn AzureManagedIdentityApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    if let AzureIdentityShape::ManagedIdentity {
        resource_group,
        location,
        ..
    } = config.shape.clone()
    {
        let identity = managed_identities
            .create_or_update(&resource_group, &config.name, &location)
            .await
            .map_err(|e| {
                Error::cloud(ActiveCloud::Azure, "update-managed-identity", &config.name, e)
            })?;
        capture_managed_identity(config, &identity);
    }
    Ok(())
}

/// Deleting the root object is enough: federated credentials go with the
/// managed identity, the service principal and secret go with the
/// application.
pub async fn delete_application_identity(
    ctx: &OpContext,
    config: &mut AzureIdentityConfig,
    managed_identities: &dyn AzureManagedIdentityApi,
    graph: &dyn AzureGraphApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    match config.shape.clone() {
        AzureIdentityShape::ManagedIdentity { resource_group, .. } => {
            match managed_identities.delete(&resource_group, &config.name).await {
                Ok(()) => {
                    info!(name = %config.name, "deleted managed identity");
                    Ok(())
                }
                Err(e) if e.is_not_found() => {
                    debug!(name = %config.name, "managed identity already deleted");
                    Ok(())
                }
                Err(e) => Err(Error::cloud(
                    ActiveCloud::Azure,
                    "delete-managed-identity",
                    &config.name,
                    e,
                )),
            }
        }
        AzureIdentityShape::Application => {
            let object_id = config
                .application_id
                .clone()
                .or_else(|| config.id.clone())
                .ok_or_else(|| {
                    Error::Validation("azure application has no object id to delete".to_string())
                })?;
            match graph.delete_application(&object_id).await {
                Ok(()) => {
                    info!(object_id = %object_id, "deleted application");
                    Ok(())
                }
                Err(e) if e.is_not_found() => {
                    debug!(object_id = %object_id, "application already deleted");
                    Ok(())
                }
                Err(e) => Err(Error::cloud(
                    ActiveCloud::Azure,
                    "delete-application",
                    object_id,
                    e,
                )),
            }
        }
    }
}
