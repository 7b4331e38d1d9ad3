//! The project IAM policy document: wire model, pure binding edits, and
//! the optimistic-concurrency save loop.
//!
//! GCP exposes no per-binding mutation API; every change is expressed as
//! fetch-full-document, edit in memory, save-full-document. Many
//! independent permission resources (possibly in separate processes)
//! share one project document, so a save can collide with a concurrent
//! writer. [`mutate_project_policy`] handles that collision by
//! refetching and recomputing the edit, never by replaying a stale
//! in-memory diff.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::GcpResourceManagerApi;
use crate::config::ActiveCloud;
use crate::context::{
    OpContext, POLICY_CONFLICT_BACKOFF_CEILING, POLICY_CONFLICT_INITIAL_BACKOFF,
};
use crate::error::{Error, Result};

/// Conditional bindings require policy schema version 3.
pub const POLICY_VERSION: i32 = 3;

/// The versioned policy document. `etag` is the concurrency token the
/// service uses to detect lost updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

/// One role granted to a set of members, optionally gated by a
/// condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
    #[serde(default)]
    pub members: Vec<String>,
}

/// A CEL condition expression. Two bindings with the same role but
/// different conditions are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BindingKey {
    role: String,
    condition: Option<Expr>,
}

/// Merge `member` into the binding keyed by `(role, condition)`.
/// Membership is a set: adding an existing member is a no-op, so
/// retries and re-invocations never duplicate an entry.
pub fn add_to_policy(policy: &mut PolicyDocument, role: &str, member: &str, condition: Option<&Expr>) {
    let mut map = bindings_map(&policy.bindings);
    map.entry(BindingKey {
        role: role.to_string(),
        condition: condition.cloned(),
    })
    .or_default()
    .insert(member.to_string());
    policy.bindings = bindings_from_map(map);
}

/// Remove `member` from the binding keyed by `(role, condition)`. A pair
/// that is not present is a no-op; a binding left with no members is
/// dropped from the document entirely.
pub fn remove_from_policy(
    policy: &mut PolicyDocument,
    role: &str,
    member: &str,
    condition: Option<&Expr>,
) {
    let mut map = bindings_map(&policy.bindings);
    let key = BindingKey {
        role: role.to_string(),
        condition: condition.cloned(),
    };
    if let Some(members) = map.get_mut(&key) {
        members.remove(member);
        if members.is_empty() {
            map.remove(&key);
        }
    }
    policy.bindings = bindings_from_map(map);
}

/// Collapse the binding list into a map keyed by `(role, condition)`,
/// unioning members of duplicate keys and dropping empty bindings.
fn bindings_map(bindings: &[Binding]) -> BTreeMap<BindingKey, BTreeSet<String>> {
    let mut map: BTreeMap<BindingKey, BTreeSet<String>> = BTreeMap::new();
    for binding in bindings {
        if binding.members.is_empty() {
            continue;
        }
        let key = BindingKey {
            role: binding.role.clone(),
            condition: binding.condition.clone(),
        };
        map.entry(key)
            .or_default()
            .extend(binding.members.iter().cloned());
    }
    map
}

/// Canonical list form: bindings ordered by key, members sorted.
fn bindings_from_map(map: BTreeMap<BindingKey, BTreeSet<String>>) -> Vec<Binding> {
    map.into_iter()
        .map(|(key, members)| Binding {
            role: key.role,
            condition: key.condition,
            members: members.into_iter().collect(),
        })
        .collect()
}

/// Run fetch → modify → save against the shared project policy until a
/// save lands or the conflict-backoff budget is exhausted.
///
/// The `edit` closure is applied to a freshly fetched document on every
/// attempt; correctness depends on re-deriving the diff from the latest
/// remote state, so a stale edited document is never resubmitted. On a
/// conflict (409/412) the loop sleeps `1s, 2s, 4s, ...` and aborts once
/// cumulative backoff would exceed 30s. Any other save error is fatal
/// immediately. Cancellation is observed before each fetch and during
/// every sleep.
pub async fn mutate_project_policy<F>(
    ctx: &OpContext,
    client: &dyn GcpResourceManagerApi,
    project: &str,
    edit: F,
) -> Result<PolicyDocument>
where
    F: Fn(&mut PolicyDocument),
{
    let mut backoff = POLICY_CONFLICT_INITIAL_BACKOFF;
    let mut slept = Duration::ZERO;
    let mut attempts: u32 = 0;

    loop {
        ctx.check_cancelled()?;
        attempts += 1;

        let mut policy = client
            .get_project_iam_policy(project, POLICY_VERSION)
            .await
            .map_err(|e| Error::cloud(ActiveCloud::Gcp, "get-iam-policy", project, e))?;
        // The service does not reliably honor the requested-version
        // hint, so pin the field before saving conditional bindings.
        policy.version = POLICY_VERSION;

        edit(&mut policy);

        match client.set_project_iam_policy(project, &policy).await {
            Ok(saved) => {
                debug!(project, attempts, "saved project IAM policy");
                return Ok(saved);
            }
            Err(e) if e.is_conflict() => {
                if slept + backoff > POLICY_CONFLICT_BACKOFF_CEILING {
                    return Err(Error::Transient {
                        cloud: ActiveCloud::Gcp,
                        operation: "set-iam-policy",
                        attempts,
                        source: e,
                    });
                }
                warn!(
                    project,
                    attempt = attempts,
                    backoff_secs = backoff.as_secs(),
                    "concurrent policy change, backing off and refetching"
                );
                ctx.sleep(backoff).await?;
                slept += backoff;
                backoff *= 2;
            }
            Err(e) => {
                return Err(Error::cloud(ActiveCloud::Gcp, "set-iam-policy", project, e));
            }
        }
    }
}
