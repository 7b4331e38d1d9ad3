//! Azure role assignments.
//!
//! The role definition is resolved by display name at the target scope,
//! then the assignment is created under a fresh GUID. A brand-new
//! principal is often not yet replicated when the assignment lands, so
//! creation retries `PrincipalNotFound` alongside ordinary transients.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AzureAuthorizationApi, AzureRoleAssignment};
use crate::clients::CloudApiError;
use crate::config::ActiveCloud;
use crate::context::{OpContext, ROLE_ASSIGNMENT_ATTEMPTS, ROLE_ASSIGNMENT_RETRY_DELAY};
use crate::error::{Error, Result};

/// Separator between the scope and the GUID in a fully qualified
/// assignment id.
const ROLE_ASSIGNMENT_SEPARATOR: &str = "/providers/Microsoft.Authorization/roleAssignments/";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzurePermissionConfig {
    /// Fully qualified role assignment id once created.
    pub id: Option<String>,
    pub scope: String,
    pub role_definition_name: String,
    pub principal_id: String,
}

pub async fn create_application_permission(
    ctx: &OpContext,
    config: &mut AzurePermissionConfig,
    client: &dyn AzureAuthorizationApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let role_definition_id =
        resolve_role_definition(config, client).await?;
    let assignment_name = Uuid::new_v4().to_string();
    let assignment = create_role_assignment_with_retry(
        ctx,
        config,
        client,
        &assignment_name,
        &role_definition_id,
    )
    .await?;

    info!(
        scope = %config.scope,
        role = %config.role_definition_name,
        principal_id = %config.principal_id,
        assignment_id = %assignment.id,
        "created role assignment"
    );
    config.id = Some(assignment.id);
    Ok(())
}

/// An assignment has no mutable or drift-prone fields beyond its id.
pub async fn read_application_permission(
    ctx: &OpContext,
    _config: &mut AzurePermissionConfig,
    _client: &dyn AzureAuthorizationApi,
) -> Result<()> {
    ctx.check_cancelled()
}

/// Scope, role and principal all force replacement.
pub async fn update_application_permission(
    ctx: &OpContext,
    _config: &mut AzurePermissionConfig,
    _client: &dyn AzureAuthorizationApi,
) -> Result<()> {
    ctx.check_cancelled()
}

pub async fn delete_application_permission(
    ctx: &OpContext,
    config: &mut AzurePermissionConfig,
    client: &dyn AzureAuthorizationApi,
) -> Result<()> {
    ctx.check_cancelled()?;

    let id = config
        .id
        .clone()
        .ok_or_else(|| Error::Validation("azure permission has no id to delete".to_string()))?;
    if !id.contains(ROLE_ASSIGNMENT_SEPARATOR) {
        return Err(Error::Validation(format!(
            "malformed azure role assignment id '{id}'"
        )));
    }

    match client.delete_role_assignment(&id).await {
        Ok(()) => {
            info!(assignment_id = %id, "deleted role assignment");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(assignment_id = %id, "role assignment already deleted");
            Ok(())
        }
        Err(e) => Err(Error::cloud(ActiveCloud::Azure, "delete-role-assignment", id, e)),
    }
}

/// Exactly one definition must match the display name at the scope;
/// zero or several mean the request is ambiguous and no assignment is
/// attempted.
async fn resolve_role_definition(
    config: &AzurePermissionConfig,
    client: &dyn AzureAuthorizationApi,
) -> Result<String> {
    let filter = format!("roleName eq '{}'", config.role_definition_name);
    let matches = client
        .list_role_definitions(&config.scope, &filter)
        .await
        .map_err(|e| {
            Error::cloud(
                ActiveCloud::Azure,
                "list-role-definitions",
                &config.role_definition_name,
                e,
            )
        })?;

    match matches.as_slice() {
        [definition] => {
            // Re-fetch by id so the assignment references the
            // authoritative definition, not the list projection.
            let definition = client
                .get_role_definition(&config.scope, &definition.id)
                .await
                .map_err(|e| {
                    Error::cloud(ActiveCloud::Azure, "get-role-definition", &definition.id, e)
                })?;
            Ok(definition.id)
        }
        [] => Err(Error::Validation(format!(
            "no role definition named '{}' at scope '{}'",
            config.role_definition_name, config.scope
        ))),
        _ => Err(Error::Validation(format!(
            "{} role definitions named '{}' at scope '{}'",
            matches.len(),
            config.role_definition_name,
            config.scope
        ))),
    }
}

async fn create_role_assignment_with_retry(
    ctx: &OpContext,
    config: &AzurePermissionConfig,
    client: &dyn AzureAuthorizationApi,
    assignment_name: &str,
    role_definition_id: &str,
) -> Result<AzureRoleAssignment> {
    let mut last: Option<CloudApiError> = None;
    for attempt in 1..=ROLE_ASSIGNMENT_ATTEMPTS {
        ctx.check_cancelled()?;
        match client
            .create_role_assignment(
                &config.scope,
                assignment_name,
                role_definition_id,
                &config.principal_id,
            )
            .await
        {
            Ok(assignment) => return Ok(assignment),
            Err(e) if e.retryable || e.is_principal_not_found() => {
                warn!(
                    scope = %config.scope,
                    principal_id = %config.principal_id,
                    attempt,
                    error = %e,
                    "role assignment not accepted yet, retrying"
                );
                last = Some(e);
            }
            Err(e) => {
                return Err(Error::cloud(
                    ActiveCloud::Azure,
                    "create-role-assignment",
                    &config.scope,
                    e,
                ))
            }
        }
        if attempt < ROLE_ASSIGNMENT_ATTEMPTS {
            ctx.sleep(ROLE_ASSIGNMENT_RETRY_DELAY).await?;
        }
    }
    Err(Error::Transient {
        cloud: ActiveCloud::Azure,
        operation: "create-role-assignment",
        attempts: ROLE_ASSIGNMENT_ATTEMPTS,
        source: last.unwrap_or_else(|| CloudApiError::transient("role assignment never accepted")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::AzureRoleDefinition;
    use crate::clients::ApiResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    struct MockAuthorization {
        definitions: Vec<AzureRoleDefinition>,
        assignment_responses: Mutex<VecDeque<ApiResult<()>>>,
        attempts: Mutex<u32>,
        deletes: Mutex<Vec<String>>,
        delete_response: Mutex<Option<CloudApiError>>,
    }

    impl MockAuthorization {
        fn new(definitions: Vec<AzureRoleDefinition>) -> Self {
            Self {
                definitions,
                assignment_responses: Mutex::new(VecDeque::new()),
                attempts: Mutex::new(0),
                deletes: Mutex::new(Vec::new()),
                delete_response: Mutex::new(None),
            }
        }

        fn reader_definition() -> Vec<AzureRoleDefinition> {
            vec![AzureRoleDefinition {
                id: "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/def-1"
                    .to_string(),
                display_name: "Reader".to_string(),
            }]
        }
    }

    #[async_trait]
    impl AzureAuthorizationApi for MockAuthorization {
        async fn list_role_definitions(
            &self,
            _scope: &str,
            filter: &str,
        ) -> ApiResult<Vec<AzureRoleDefinition>> {
            Ok(self
                .definitions
                .iter()
                .filter(|d| filter == format!("roleName eq '{}'", d.display_name))
                .cloned()
                .collect())
        }

        async fn get_role_definition(
            &self,
            _scope: &str,
            definition_id: &str,
        ) -> ApiResult<AzureRoleDefinition> {
            self.definitions
                .iter()
                .find(|d| d.id == definition_id)
                .cloned()
                .ok_or_else(|| CloudApiError::not_found("role definition not found"))
        }

        async fn create_role_assignment(
            &self,
            scope: &str,
            assignment_name: &str,
            _role_definition_id: &str,
            _principal_id: &str,
        ) -> ApiResult<AzureRoleAssignment> {
            *self.attempts.lock().unwrap() += 1;
            if let Some(response) = self.assignment_responses.lock().unwrap().pop_front() {
                response?;
            }
            Ok(AzureRoleAssignment {
                id: format!("{scope}{ROLE_ASSIGNMENT_SEPARATOR}{assignment_name}"),
                name: assignment_name.to_string(),
            })
        }

        async fn delete_role_assignment(&self, assignment_id: &str) -> ApiResult<()> {
            self.deletes.lock().unwrap().push(assignment_id.to_string());
            match self.delete_response.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn config() -> AzurePermissionConfig {
        AzurePermissionConfig {
            scope: "/subscriptions/sub-1/resourceGroups/rg-1".to_string(),
            role_definition_name: "Reader".to_string(),
            principal_id: "principal-1".to_string(),
            ..Default::default()
        }
    }

    fn principal_not_found() -> CloudApiError {
        CloudApiError::with_status("PrincipalNotFound: principal principal-1 does not exist", 400)
    }

    #[tokio::test]
    async fn create_records_the_fully_qualified_assignment_id() {
        let client = MockAuthorization::new(MockAuthorization::reader_definition());
        let mut cfg = config();

        create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap();

        let id = cfg.id.unwrap();
        assert!(id.starts_with("/subscriptions/sub-1/resourceGroups/rg-1"));
        assert!(id.contains(ROLE_ASSIGNMENT_SEPARATOR));
    }

    #[tokio::test]
    async fn create_rejects_an_unknown_role_name_before_assigning() {
        let client = MockAuthorization::new(MockAuthorization::reader_definition());
        let mut cfg = config();
        cfg.role_definition_name = "Spectator".to_string();

        let err = create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(*client.attempts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn create_rejects_an_ambiguous_role_name() {
        let mut definitions = MockAuthorization::reader_definition();
        definitions.push(AzureRoleDefinition {
            id: "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/def-2"
                .to_string(),
            display_name: "Reader".to_string(),
        });
        let client = MockAuthorization::new(definitions);
        let mut cfg = config();

        let err = create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(*client.attempts.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_out_principal_replication_lag() {
        let client = MockAuthorization::new(MockAuthorization::reader_definition());
        {
            let mut responses = client.assignment_responses.lock().unwrap();
            responses.push_back(Err(principal_not_found()));
            responses.push_back(Err(principal_not_found()));
        }
        let mut cfg = config();

        let start = Instant::now();
        create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap();

        assert_eq!(*client.attempts.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(cfg.id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn create_gives_up_once_the_retry_budget_is_spent() {
        let client = MockAuthorization::new(MockAuthorization::reader_definition());
        {
            let mut responses = client.assignment_responses.lock().unwrap();
            for _ in 0..ROLE_ASSIGNMENT_ATTEMPTS {
                responses.push_back(Err(principal_not_found()));
            }
        }
        let mut cfg = config();

        let start = Instant::now();
        let err = create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transient { .. }));
        assert_eq!(*client.attempts.lock().unwrap(), ROLE_ASSIGNMENT_ATTEMPTS);
        // Sleeps only between attempts, never after the last one.
        assert_eq!(
            start.elapsed(),
            ROLE_ASSIGNMENT_RETRY_DELAY * (ROLE_ASSIGNMENT_ATTEMPTS - 1)
        );
        assert!(cfg.id.is_none());
    }

    #[tokio::test]
    async fn create_fails_fast_on_a_non_retryable_error() {
        let client = MockAuthorization::new(MockAuthorization::reader_definition());
        client
            .assignment_responses
            .lock()
            .unwrap()
            .push_back(Err(CloudApiError::with_status("authorization failed", 403)));
        let mut cfg = config();

        let err = create_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cloud { .. }));
        assert_eq!(*client.attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_requires_a_well_formed_assignment_id() {
        let client = MockAuthorization::new(Vec::new());
        let mut cfg = config();
        cfg.id = Some("not-an-assignment-id".to_string());

        let err = delete_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(client.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_tolerates_an_already_deleted_assignment() {
        let client = MockAuthorization::new(Vec::new());
        *client.delete_response.lock().unwrap() =
            Some(CloudApiError::not_found("assignment not found"));
        let mut cfg = config();
        cfg.id = Some(format!(
            "/subscriptions/sub-1/resourceGroups/rg-1{ROLE_ASSIGNMENT_SEPARATOR}guid-1"
        ));

        delete_application_permission(&OpContext::new(), &mut cfg, &client)
            .await
            .unwrap();
    }
}
