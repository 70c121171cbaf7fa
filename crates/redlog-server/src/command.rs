//! Operator command line
//!
//! Every command prints one JSON document on stdout.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::error;

use redlog_common::error::SERVER_ERROR;
use redlog_common::{Actor, Credential, RedlogError};

use crate::model::config::{ConfigOverrides, DEFAULT_CONFIG_FILE};
use crate::startup::Services;

/// Redlog operator CLI
#[derive(Debug, Parser)]
#[command(name = "redlog", version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    pub db_url: Option<String>,
    /// `external_db` or `standalone_embedded`
    #[arg(long = "storage-mode")]
    pub storage_mode: Option<String>,
    /// RocksDB directory for embedded storage
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            db_url: self.db_url.clone(),
            storage_mode: self.storage_mode.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a JSON batch of log records on behalf of a credential
    Ingest {
        /// File holding a JSON array of records, or `{"records": [...]}`
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        credential: String,
        /// User the records are attributed to
        #[arg(long)]
        owner: String,
        #[arg(long)]
        engagement: Option<i64>,
    },
    /// Unlock every record
    ReleaseLocks {
        #[arg(long)]
        admin: String,
    },
    /// Usage count of every tag
    TagStats,
    /// Tags most often attached together with a tag
    CoOccurrence {
        #[arg(long)]
        tag: i64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create the operation tag of an engagement
    ProvisionOperation {
        #[arg(long)]
        engagement: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        admin: String,
    },
}

/// Read a batch file: either a bare array or an object with a `records` array
pub fn read_batch(path: &Path) -> anyhow::Result<Vec<Value>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document: Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(records)) => Ok(records),
            _ => anyhow::bail!("{} has no \"records\" array", path.display()),
        },
        _ => anyhow::bail!("{} must hold a JSON array of records", path.display()),
    }
}

pub async fn execute(services: &Services, command: Command) -> anyhow::Result<Value> {
    let output = match command {
        Command::Ingest {
            file,
            credential,
            owner,
            engagement,
        } => {
            let records = read_batch(&file)?;
            let mut credential = Credential::new(credential, owner);
            if let Some(engagement_id) = engagement {
                credential = credential.with_engagement(engagement_id);
            }
            let report = services.ingestor.ingest(&credential, records).await?;
            serde_json::to_value(report)?
        }
        Command::ReleaseLocks { admin } => {
            let released = services
                .records
                .release_all_locks(&Actor::admin(admin))
                .await?;
            json!({ "released": released })
        }
        Command::TagStats => serde_json::to_value(services.tags.get_tag_stats().await?)?,
        Command::CoOccurrence { tag, limit } => {
            serde_json::to_value(services.tags.get_tag_co_occurrence(tag, limit).await?)?
        }
        Command::ProvisionOperation {
            engagement,
            name,
            color,
            admin,
        } => {
            let tag = services
                .tags
                .provision_operation_tag(engagement, &name, color.as_deref(), &Actor::admin(admin))
                .await?;
            serde_json::to_value(tag)?
        }
    };
    Ok(output)
}

/// JSON body describing a failed command
pub fn error_body(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<RedlogError>() {
        Some(RedlogError::Internal(detail)) => {
            error!(detail = %detail, "Internal error");
            json!({ "code": SERVER_ERROR.code, "message": SERVER_ERROR.message })
        }
        Some(e) => {
            let code = e.error_code();
            json!({
                "code": code.code,
                "message": code.message,
                "error": e.to_string(),
                "errors": e.field_errors(),
            })
        }
        None => json!({ "code": -1, "message": format!("{:#}", err) }),
    }
}
