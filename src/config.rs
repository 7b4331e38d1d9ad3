//! Provider configuration: per-cloud credential blocks and the
//! exactly-one-cloud resolution rule.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The cloud a provider instance is bound to, resolved once at
/// initialization. Every lifecycle operation dispatches on this value at
/// the router boundary and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveCloud {
    Aws,
    Azure,
    Gcp,
}

impl std::fmt::Display for ActiveCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveCloud::Aws => write!(f, "aws"),
            ActiveCloud::Azure => write!(f, "azure"),
            ActiveCloud::Gcp => write!(f, "gcp"),
        }
    }
}

/// Credentials and defaults for AWS. Consumed by the host's client
/// factory; the role is assumed with the given external id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsSettings {
    pub role_arn: String,
    pub external_id: String,
    pub region: String,
}

/// Service-principal credentials for Azure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureSettings {
    pub subscription_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
}

/// Service-account credentials and default project for GCP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpSettings {
    /// Contents of a service account key file in JSON format.
    pub credentials: String,
    /// The project that owns identities and the shared IAM policy.
    pub project: String,
}

/// Top-level provider settings. Exactly one of the three blocks must be
/// present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpSettings>,
}

impl ProviderSettings {
    /// Resolve the active cloud, rejecting zero or multiple configured
    /// blocks with an error naming the problem.
    pub fn resolve(&self) -> Result<ActiveCloud> {
        let mut configured = Vec::new();
        if self.aws.is_some() {
            configured.push(ActiveCloud::Aws);
        }
        if self.azure.is_some() {
            configured.push(ActiveCloud::Azure);
        }
        if self.gcp.is_some() {
            configured.push(ActiveCloud::Gcp);
        }

        match configured.as_slice() {
            [cloud] => Ok(*cloud),
            [] => Err(Error::Configuration(
                "one of 'aws', 'azure' or 'gcp' must be set".to_string(),
            )),
            many => {
                let names: Vec<String> = many.iter().map(|c| c.to_string()).collect();
                Err(Error::Configuration(format!(
                    "exactly one cloud may be configured, got {}: {}",
                    many.len(),
                    names.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_picks_the_single_configured_cloud() {
        let settings = ProviderSettings {
            gcp: Some(GcpSettings {
                credentials: "{}".to_string(),
                project: "my-project".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(settings.resolve().unwrap(), ActiveCloud::Gcp);
    }

    #[test]
    fn resolve_rejects_no_cloud() {
        let err = ProviderSettings::default().resolve().unwrap_err();
        assert!(err.to_string().contains("one of 'aws', 'azure' or 'gcp'"));
    }

    #[test]
    fn resolve_rejects_multiple_clouds() {
        let settings = ProviderSettings {
            aws: Some(AwsSettings::default()),
            azure: Some(AzureSettings::default()),
            ..Default::default()
        };
        let err = settings.resolve().unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("exactly one"));
        assert!(rendered.contains("aws"));
        assert!(rendered.contains("azure"));
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = ProviderSettings {
            azure: Some(AzureSettings {
                subscription_id: "sub".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                tenant_id: "tenant".to_string(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("aws"));
        let back: ProviderSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
