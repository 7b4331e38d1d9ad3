//! GCP application identity: a service account, optionally bound to a
//! Kubernetes service account through workload identity.

use tracing::{debug, info};

use super::policy::add_to_policy;
use super::GcpIamApi;
use crate::clients::CloudApiError;
use crate::config::ActiveCloud;
use crate::context::{OpContext, SERVICE_ACCOUNT_POLL_ATTEMPTS, SERVICE_ACCOUNT_POLL_INTERVAL};
use crate::error::{Error, Result};

const WORKLOAD_IDENTITY_ROLE: &str = "roles/iam.workloadIdentityUser";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcpIdentityConfig {
    /// Service account email once created.
    pub id: Option<String>,
    pub name: String,
    pub project: String,
    /// Workload identity pair; both set or both absent.
    pub kubernetes_namespace: Option<String>,
    pub kubernetes_service_account: Option<String>,
    pub service_account_email: Option<String>,
}

fn resource_name(project: &str, email: &str) -> String {
    format!("projects/{project}/serviceAccounts/{email}")
}

/// Create the service account and, when a Kubernetes pair is supplied,
/// grant the workload-identity binding on the account's own IAM policy.
///
/// There is no rollback: if the binding step fails the account persists,
/// and re-invoking resumes from the recorded email without creating a
/// second account. The binding itself is a set union, so repeating it is
/// harmless.
pub async fn create_application_identity(
    ctx: &OpContext,
    config: &mut GcpIdentityConfig,
    client: &dyn GcpIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let email = match &config.id {
        Some(email) => {
            debug!(email = %email, "service account already created, resuming");
            email.clone()
        }
        None => {
            let account = client
                .create_service_account(&config.project, &config.name, &config.name)
                .await
                .map_err(|e| {
                    Error::cloud(ActiveCloud::Gcp, "create-service-account", &config.name, e)
                })?;
            info!(email = %account.email, "created service account");
            config.id = Some(account.email.clone());
            config.service_account_email = Some(account.email.clone());
            account.email
        }
    };

    if let (Some(namespace), Some(ksa)) = (
        config.kubernetes_namespace.clone(),
        config.kubernetes_service_account.clone(),
    ) {
        let resource = resource_name(&config.project, &email);
        // A freshly created account may not be visible to dependent
        // calls yet; wait it out before touching its policy.
        wait_for_service_account(ctx, client, &resource).await?;
        bind_workload_identity(ctx, client, &config.project, &resource, &namespace, &ksa).await?;
    }

    Ok(())
}

/// Refresh email and display name from the service.
pub async fn read_application_identity(
    ctx: &OpContext,
    config: &mut GcpIdentityConfig,
    client: &dyn GcpIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let email = config
        .id
        .clone()
        .ok_or_else(|| Error::Validation("gcp identity has no id to read".to_string()))?;
    let resource = resource_name(&config.project, &email);
    let account = client
        .get_service_account(&resource)
        .await
        .map_err(|e| Error::cloud(ActiveCloud::Gcp, "get-service-account", &resource, e))?;

    config.id = Some(account.email.clone());
    config.service_account_email = Some(account.email);
    config.name = account.display_name;
    Ok(())
}

/// Patch the display name. The account id (email) never changes here.
pub async fn update_application_identity(
    ctx: &OpContext,
    config: &mut GcpIdentityConfig,
    client: &dyn GcpIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let email = config
        .id
        .clone()
        .ok_or_else(|| Error::Validation("gcp identity has no id to update".to_string()))?;
    let resource = resource_name(&config.project, &email);
    client
        .patch_service_account(&resource, &config.name)
        .await
        .map_err(|e| Error::cloud(ActiveCloud::Gcp, "patch-service-account", &resource, e))?;
    Ok(())
}

pub async fn delete_application_identity(
    ctx: &OpContext,
    config: &mut GcpIdentityConfig,
    client: &dyn GcpIamApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let email = config.id.clone().unwrap_or_else(|| config.name.clone());
    let resource = resource_name(&config.project, &email);
    match client.delete_service_account(&resource).await {
        Ok(()) => {
            info!(resource = %resource, "deleted service account");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(resource = %resource, "service account already deleted");
            Ok(())
        }
        Err(e) => Err(Error::cloud(
            ActiveCloud::Gcp,
            "delete-service-account",
            resource,
            e,
        )),
    }
}

/// Bounded fixed-interval poll on `Get` until the new account is
/// visible. 404 means propagation lag and is retried; anything else is
/// fatal, as is exhausting the budget.
async fn wait_for_service_account(
    ctx: &OpContext,
    client: &dyn GcpIamApi,
    resource: &str,
) -> Result<()> {
    let mut last = CloudApiError::not_found("service account never became visible");
    for attempt in 1..=SERVICE_ACCOUNT_POLL_ATTEMPTS {
        ctx.check_cancelled()?;
        match client.get_service_account(resource).await {
            Ok(_) => {
                debug!(resource, attempt, "service account visible");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                debug!(resource, attempt, "service account not visible yet");
                last = e;
            }
            Err(e) => {
                return Err(Error::cloud(ActiveCloud::Gcp, "get-service-account", resource, e))
            }
        }
        if attempt < SERVICE_ACCOUNT_POLL_ATTEMPTS {
            ctx.sleep(SERVICE_ACCOUNT_POLL_INTERVAL).await?;
        }
    }
    Err(Error::Transient {
        cloud: ActiveCloud::Gcp,
        operation: "get-service-account",
        attempts: SERVICE_ACCOUNT_POLL_ATTEMPTS,
        source: last,
    })
}

/// Read-modify-write on the service account's own IAM policy. This is a
/// per-resource document with no cross-resource sharing, so unlike the
/// project policy a single fetch/save pair suffices.
async fn bind_workload_identity(
    ctx: &OpContext,
    client: &dyn GcpIamApi,
    project: &str,
    resource: &str,
    namespace: &str,
    ksa: &str,
) -> Result<()> {
    ctx.check_cancelled()?;

    let member = format!("serviceAccount:{project}.svc.id.goog[{namespace}/{ksa}]");
    let mut policy = client
        .get_service_account_iam_policy(resource)
        .await
        .map_err(|e| {
            Error::cloud(ActiveCloud::Gcp, "get-service-account-iam-policy", resource, e)
        })?;
    add_to_policy(&mut policy, WORKLOAD_IDENTITY_ROLE, &member, None);
    client
        .set_service_account_iam_policy(resource, &policy)
        .await
        .map_err(|e| {
            Error::cloud(ActiveCloud::Gcp, "set-service-account-iam-policy", resource, e)
        })?;

    info!(resource, member = %member, "granted workload identity binding");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ApiResult;
    use crate::gcp::policy::PolicyDocument;
    use crate::gcp::GcpServiceAccount;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fake IAM API with a scripted number of 404s before the account
    /// becomes visible.
    struct MockIam {
        visible_after_gets: u32,
        gets: Mutex<u32>,
        creates: Mutex<u32>,
        sa_policy: Mutex<PolicyDocument>,
        policy_saves: Mutex<u32>,
        deleted: Mutex<Vec<String>>,
    }

    impl MockIam {
        fn new(visible_after_gets: u32) -> Self {
            Self {
                visible_after_gets,
                gets: Mutex::new(0),
                creates: Mutex::new(0),
                sa_policy: Mutex::new(PolicyDocument::default()),
                policy_saves: Mutex::new(0),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GcpIamApi for MockIam {
        async fn create_service_account(
            &self,
            project: &str,
            account_id: &str,
            display_name: &str,
        ) -> ApiResult<GcpServiceAccount> {
            *self.creates.lock().unwrap() += 1;
            Ok(GcpServiceAccount {
                email: format!("{account_id}@{project}.iam.gserviceaccount.com"),
                display_name: display_name.to_string(),
            })
        }

        async fn get_service_account(&self, resource_name: &str) -> ApiResult<GcpServiceAccount> {
            let mut gets = self.gets.lock().unwrap();
            *gets += 1;
            if *gets <= self.visible_after_gets {
                return Err(CloudApiError::not_found("service account not found"));
            }
            let email = resource_name
                .rsplit_once('/')
                .map(|(_, email)| email.to_string())
                .unwrap_or_default();
            Ok(GcpServiceAccount {
                email,
                display_name: "svc-a".to_string(),
            })
        }

        async fn patch_service_account(
            &self,
            _resource_name: &str,
            display_name: &str,
        ) -> ApiResult<GcpServiceAccount> {
            Ok(GcpServiceAccount {
                email: String::new(),
                display_name: display_name.to_string(),
            })
        }

        async fn delete_service_account(&self, resource_name: &str) -> ApiResult<()> {
            self.deleted.lock().unwrap().push(resource_name.to_string());
            Ok(())
        }

        async fn get_service_account_iam_policy(
            &self,
            _resource_name: &str,
        ) -> ApiResult<PolicyDocument> {
            Ok(self.sa_policy.lock().unwrap().clone())
        }

        async fn set_service_account_iam_policy(
            &self,
            _resource_name: &str,
            policy: &PolicyDocument,
        ) -> ApiResult<PolicyDocument> {
            *self.policy_saves.lock().unwrap() += 1;
            *self.sa_policy.lock().unwrap() = policy.clone();
            Ok(policy.clone())
        }
    }

    fn config_with_workload_identity() -> GcpIdentityConfig {
        GcpIdentityConfig {
            name: "svc-a".to_string(),
            project: "my-project".to_string(),
            kubernetes_namespace: Some("default".to_string()),
            kubernetes_service_account: Some("svc-a".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_out_propagation_before_binding() {
        // First Get 404s, the second succeeds.
        let client = MockIam::new(1);
        let mut config = config_with_workload_identity();

        create_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();

        assert_eq!(
            config.id.as_deref(),
            Some("svc-a@my-project.iam.gserviceaccount.com")
        );
        assert_eq!(*client.gets.lock().unwrap(), 2);
        assert_eq!(*client.policy_saves.lock().unwrap(), 1);

        let policy = client.sa_policy.lock().unwrap();
        assert_eq!(policy.bindings[0].role, WORKLOAD_IDENTITY_ROLE);
        assert_eq!(
            policy.bindings[0].members,
            vec!["serviceAccount:my-project.svc.id.goog[default/svc-a]".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_fails_permanently_when_poll_budget_is_exhausted() {
        let client = MockIam::new(u32::MAX);
        let mut config = config_with_workload_identity();

        let start = tokio::time::Instant::now();
        let err = create_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transient { .. }));
        assert_eq!(*client.gets.lock().unwrap(), SERVICE_ACCOUNT_POLL_ATTEMPTS);
        // Sleeps only between attempts, never after the last one.
        assert_eq!(
            start.elapsed(),
            SERVICE_ACCOUNT_POLL_INTERVAL * (SERVICE_ACCOUNT_POLL_ATTEMPTS - 1)
        );
        assert_eq!(*client.policy_saves.lock().unwrap(), 0);
        // The account itself was created; the id survives for a resume.
        assert!(config.id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reinvoking_after_partial_failure_does_not_duplicate() {
        let client = MockIam::new(0);
        let mut config = config_with_workload_identity();
        config.id = Some("svc-a@my-project.iam.gserviceaccount.com".to_string());

        create_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();
        create_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();

        assert_eq!(*client.creates.lock().unwrap(), 0);
        let policy = client.sa_policy.lock().unwrap();
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members.len(), 1);
    }

    #[tokio::test]
    async fn create_without_kubernetes_pair_skips_poll_and_binding() {
        let client = MockIam::new(u32::MAX);
        let mut config = GcpIdentityConfig {
            name: "svc-a".to_string(),
            project: "my-project".to_string(),
            ..Default::default()
        };

        create_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();

        assert_eq!(*client.gets.lock().unwrap(), 0);
        assert_eq!(*client.policy_saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_addresses_the_full_resource_name() {
        let client = MockIam::new(0);
        let mut config = GcpIdentityConfig {
            id: Some("svc-a@my-project.iam.gserviceaccount.com".to_string()),
            name: "svc-a".to_string(),
            project: "my-project".to_string(),
            ..Default::default()
        };

        delete_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();

        assert_eq!(
            *client.deleted.lock().unwrap(),
            vec![
                "projects/my-project/serviceAccounts/svc-a@my-project.iam.gserviceaccount.com"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn read_refreshes_email_and_display_name() {
        let client = MockIam::new(0);
        let mut config = GcpIdentityConfig {
            id: Some("svc-a@my-project.iam.gserviceaccount.com".to_string()),
            name: "stale".to_string(),
            project: "my-project".to_string(),
            ..Default::default()
        };

        read_application_identity(&OpContext::new(), &mut config, &client)
            .await
            .unwrap();

        assert_eq!(config.name, "svc-a");
        assert_eq!(
            config.service_account_email.as_deref(),
            Some("svc-a@my-project.iam.gserviceaccount.com")
        );
    }
}
