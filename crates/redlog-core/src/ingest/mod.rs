//! Credential-scoped batch ingestion
//!
//! A request is rejected as a whole when it is empty, over the batch cap, or
//! over the credential's rate window. Otherwise each record is cleaned and
//! persisted on its own and the report lists every outcome by index.

mod rate_limit;

pub use rate_limit::{CredentialRateLimiter, RateLimitConfig};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use validator::ValidationError;

use redlog_common::{Credential, FieldErrors, MAX_BATCH_SIZE, RedlogError, RedlogResult};

use crate::audit::{AuditEvent, AuditSink, action};
use crate::record::{LogInput, RecordStore};
use crate::sanitize::{redact_sensitive, sanitize_object};

/// Error reported for a record that is not a JSON object of scalar fields
pub const INVALID_RECORD_FORMAT: &str = "invalid record format";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub enabled: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestSuccess {
    pub index: usize,
    pub id: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestFailure {
    pub index: usize,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    /// The submitted record, sanitized and with sensitive values redacted
    pub payload: Value,
}

/// Per-record outcome of one ingestion request
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: Vec<IngestSuccess>,
    pub failed: Vec<IngestFailure>,
}

pub struct Ingestor {
    store: Arc<RecordStore>,
    limiter: CredentialRateLimiter,
    enabled: bool,
    audit: Arc<dyn AuditSink>,
}

impl Ingestor {
    pub fn new(store: Arc<RecordStore>, config: IngestConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            limiter: CredentialRateLimiter::new(config.rate_limit),
            enabled: config.enabled,
            audit,
        }
    }

    pub async fn ingest(
        &self,
        credential: &Credential,
        records: Vec<Value>,
    ) -> RedlogResult<BatchReport> {
        let result = self.ingest_inner(credential, records).await;

        let mut event = AuditEvent::builder(action::LOG_INGEST)
            .actor(&credential.owner)
            .outcome(&result);
        match &result {
            Ok(report) => {
                info!(
                    credential = %credential.name,
                    total = report.total,
                    succeeded = report.succeeded.len(),
                    failed = report.failed.len(),
                    "Batch ingested"
                );
                event = event
                    .resource_ids(report.succeeded.iter().map(|s| s.id))
                    .details_json(&serde_json::json!({
                        "credential": credential.name,
                        "total": report.total,
                        "failed": report.failed.len(),
                    }));
            }
            Err(e) => {
                warn!(credential = %credential.name, error = ?e, "Batch rejected");
                event = event.details_json(&serde_json::json!({ "credential": credential.name }));
            }
        }
        self.audit.record(event.build());
        result
    }

    async fn ingest_inner(
        &self,
        credential: &Credential,
        records: Vec<Value>,
    ) -> RedlogResult<BatchReport> {
        if !self.enabled {
            return Err(RedlogError::permission_denied("ingestion is disabled"));
        }
        if records.is_empty() {
            let mut errors = FieldErrors::new();
            errors.add("records", ValidationError::new("empty"));
            return Err(errors.into());
        }
        if records.len() > MAX_BATCH_SIZE {
            return Err(RedlogError::BatchTooLarge {
                size: records.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        if let Err(retry_after_secs) = self.limiter.check(&credential.name) {
            return Err(RedlogError::RateLimited { retry_after_secs });
        }

        let actor = credential.as_actor();
        let mut report = BatchReport {
            total: records.len(),
            ..Default::default()
        };

        for (index, record) in records.into_iter().enumerate() {
            let input = match serde_json::from_value::<LogInput>(record.clone()) {
                Ok(input) => input,
                Err(e) => {
                    warn!(
                        credential = %credential.name,
                        index,
                        error = ?e,
                        "Unreadable ingestion record"
                    );
                    report.failed.push(IngestFailure {
                        index,
                        error: INVALID_RECORD_FORMAT.to_string(),
                        errors: None,
                        payload: redact_sensitive(&sanitize_object(&record)),
                    });
                    continue;
                }
            };

            match self.store.create_log(input, &actor).await {
                Ok(created) => report.succeeded.push(IngestSuccess {
                    index,
                    id: created.id,
                }),
                Err(e) => report.failed.push(IngestFailure {
                    index,
                    error: e.to_string(),
                    errors: e.field_errors().cloned(),
                    payload: redact_sensitive(&sanitize_object(&record)),
                }),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::tag::TagGovernor;
    use crate::test_support::embedded_store;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ingestor(config: IngestConfig) -> (Ingestor, Arc<MemoryAuditSink>, TempDir) {
        let (persistence, tmp) = embedded_store();
        let audit = Arc::new(MemoryAuditSink::new());
        let tags = Arc::new(TagGovernor::new(persistence.clone(), audit.clone()));
        let store = Arc::new(RecordStore::new(persistence, tags, audit.clone()));
        (Ingestor::new(store, config, audit.clone()), audit, tmp)
    }

    fn credential() -> Credential {
        Credential::new("c2-sync", "alice")
    }

    #[tokio::test]
    async fn test_mixed_batch_reports_each_record() {
        let (ingestor, audit, _tmp) = ingestor(IngestConfig::default());
        let report = ingestor
            .ingest(
                &credential(),
                vec![
                    json!({ "hostname": "ws01", "command": "whoami" }),
                    json!({ "internal_ip": "nope", "secrets": "hunter2" }),
                    json!("not an object"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].index, 0);

        let invalid = &report.failed[0];
        assert_eq!(invalid.index, 1);
        assert!(invalid.errors.as_ref().unwrap().contains("internal_ip"));
        assert_eq!(invalid.payload["secrets"], "[REDACTED]");

        let unreadable = &report.failed[1];
        assert_eq!(unreadable.index, 2);
        assert_eq!(unreadable.error, INVALID_RECORD_FORMAT);
        assert!(unreadable.errors.is_none());

        assert_eq!(audit.names().last().unwrap(), "log_ingest");
    }

    #[tokio::test]
    async fn test_records_are_attributed_to_credential_owner() {
        let (ingestor, _audit, _tmp) = ingestor(IngestConfig::default());
        let report = ingestor
            .ingest(&credential(), vec![json!({ "hostname": "ws01", "analyst": "mallory" })])
            .await
            .unwrap();
        let record = ingestor.store.get_log(report.succeeded[0].id).await.unwrap();
        assert_eq!(record.values.analyst.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_request_level_rejections() {
        let (ingestor, audit, _tmp) = ingestor(IngestConfig::default());

        let err = ingestor.ingest(&credential(), Vec::new()).await.unwrap_err();
        assert!(err.field_errors().unwrap().contains("records"));

        let err = ingestor
            .ingest(&credential(), vec![json!({}); MAX_BATCH_SIZE + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::BatchTooLarge { size: 51, max: 50 }));
        assert_eq!(
            ingestor.store.list_logs(1, 100).await.unwrap().total_count,
            0
        );
        assert_eq!(audit.names(), vec!["log_ingest_error", "log_ingest_error"]);
    }

    #[tokio::test]
    async fn test_rate_limited_per_credential() {
        let (ingestor, _audit, _tmp) = ingestor(IngestConfig {
            enabled: true,
            rate_limit: RateLimitConfig {
                max_requests: 1,
                window: Duration::from_secs(60),
                enabled: true,
            },
        });

        ingestor
            .ingest(&credential(), vec![json!({ "hostname": "ws-a" })])
            .await
            .unwrap();
        let err = ingestor
            .ingest(&credential(), vec![json!({ "hostname": "ws-b" })])
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::RateLimited { .. }));
        assert!(err.is_retryable());

        ingestor
            .ingest(
                &Credential::new("other", "bob"),
                vec![json!({ "hostname": "ws-c" })],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_credentials_are_forgotten() {
        let (ingestor, _audit, _tmp) = ingestor(IngestConfig {
            enabled: true,
            rate_limit: RateLimitConfig {
                max_requests: 5,
                window: Duration::from_millis(250),
                enabled: true,
            },
        });

        for name in ["sync-1", "sync-2", "sync-3"] {
            ingestor
                .ingest(&Credential::new(name, "alice"), vec![json!({ "hostname": "ws01" })])
                .await
                .unwrap();
        }
        assert_eq!(ingestor.limiter.tracked(), 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        ingestor
            .ingest(&credential(), vec![json!({ "hostname": "ws02" })])
            .await
            .unwrap();
        assert_eq!(ingestor.limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn test_disabled_ingestion() {
        let (ingestor, _audit, _tmp) = ingestor(IngestConfig {
            enabled: false,
            ..Default::default()
        });
        let err = ingestor
            .ingest(&credential(), vec![json!({})])
            .await
            .unwrap_err();
        assert!(matches!(err, RedlogError::PermissionDenied(_)));
    }
}
