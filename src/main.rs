//! Identity Agent - Standalone Binary
//!
//! Offline validation for identity and permission records: resolves the
//! active cloud from provider settings and checks that a record is
//! well-formed for it before any apply is attempted.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use multicloud_iam::router::{validate_identity_record, validate_permission_record};
use multicloud_iam::{IdentityRecord, PermissionRecord, ProviderSettings};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResourceKind {
    Identity,
    Permission,
}

/// Identity Agent - validates cross-cloud identity and permission records
#[derive(Parser, Debug)]
#[command(name = "identity-agent", version, about)]
struct Args {
    /// Path to the provider settings JSON
    #[arg(long, env = "IDENTITY_AGENT_SETTINGS")]
    settings: String,

    /// Path to the record JSON to validate
    #[arg(long, env = "IDENTITY_AGENT_INPUT")]
    input: String,

    /// Which resource kind the input holds
    #[arg(long, value_enum, default_value = "identity")]
    resource: ResourceKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .json()
        .init();

    let args = Args::parse();

    let settings_json = fs::read_to_string(&args.settings)
        .with_context(|| format!("Failed to read settings from {}", args.settings))?;
    let settings: ProviderSettings =
        serde_json::from_str(&settings_json).context("Settings JSON is malformed")?;
    let cloud = settings.resolve().context("Provider settings are invalid")?;

    let record_json = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read record from {}", args.input))?;

    match args.resource {
        ResourceKind::Identity => {
            let record: IdentityRecord =
                serde_json::from_str(&record_json).context("Identity record JSON is malformed")?;
            validate_identity_record(cloud, &settings, &record)
                .context("Identity record failed validation")?;
            info!(cloud = %cloud, name = %record.name, "Identity record is valid");
        }
        ResourceKind::Permission => {
            let record: PermissionRecord = serde_json::from_str(&record_json)
                .context("Permission record JSON is malformed")?;
            validate_permission_record(cloud, &settings, &record)
                .context("Permission record failed validation")?;
            info!(cloud = %cloud, "Permission record is valid");
        }
    }

    Ok(())
}
