//! Audit events
//!
//! Every mutation emits exactly one event: the action name on success, the
//! action name suffixed with `_error` on failure.

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use redlog_common::RedlogResult;

/// Action name constants
pub mod action {
    pub const LOG_CREATE: &str = "log_create";
    pub const LOG_UPDATE: &str = "log_update";
    pub const LOG_DELETE: &str = "log_delete";
    pub const LOG_INGEST: &str = "log_ingest";
    pub const TAG_CREATE: &str = "tag_create";
    pub const TAG_UPDATE: &str = "tag_update";
    pub const TAG_DELETE: &str = "tag_delete";
    pub const TAG_ATTACH: &str = "tag_attach";
    pub const TAG_DETACH: &str = "tag_detach";
    pub const LOCK_TOGGLE: &str = "lock_toggle";
    pub const LOCK_RELEASE_ALL: &str = "lock_release_all";
}

/// Suffix appended to the action name of a failed operation
pub const ERROR_SUFFIX: &str = "_error";

/// Tracing target audit events are written to
pub const AUDIT_TARGET: &str = "redlog::audit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: String,
    pub actor: String,
    pub resource_ids: Vec<i64>,
    pub timestamp: NaiveDateTime,
    pub success: bool,
    pub error: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event builder
    pub fn builder(action: &str) -> AuditEventBuilder {
        AuditEventBuilder::new(action)
    }

    /// Event name: the action, or `<action>_error` for failures
    pub fn name(&self) -> String {
        if self.success {
            self.action.clone()
        } else {
            format!("{}{}", self.action, ERROR_SUFFIX)
        }
    }
}

/// Builder for AuditEvent
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(action: &str) -> Self {
        Self {
            event: AuditEvent {
                action: action.to_string(),
                actor: "anonymous".to_string(),
                resource_ids: Vec::new(),
                timestamp: chrono::Utc::now().naive_utc(),
                success: true,
                error: None,
                details: None,
            },
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.event.actor = actor.into();
        self
    }

    pub fn resource_id(mut self, id: i64) -> Self {
        self.event.resource_ids.push(id);
        self
    }

    pub fn resource_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.event.resource_ids.extend(ids);
        self
    }

    pub fn success(mut self) -> Self {
        self.event.success = true;
        self.event.error = None;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.event.success = false;
        self.event.error = Some(error.into());
        self
    }

    /// Mark success or failure from an operation result
    pub fn outcome<T>(self, result: &RedlogResult<T>) -> Self {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e.to_string()),
        }
    }

    pub fn details_json<T: Serialize>(mut self, details: &T) -> Self {
        self.event.details = serde_json::to_value(details).ok();
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

/// Destination of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as structured `tracing` events on the
/// `redlog::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let name = event.name();
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        if event.success {
            info!(
                target: "redlog::audit",
                event = %name,
                actor = %event.actor,
                resource_ids = ?event.resource_ids,
                timestamp = %event.timestamp,
                details = %details,
                "audit"
            );
        } else {
            warn!(
                target: "redlog::audit",
                event = %name,
                actor = %event.actor,
                resource_ids = ?event.resource_ids,
                timestamp = %event.timestamp,
                error = event.error.as_deref().unwrap_or_default(),
                details = %details,
                "audit"
            );
        }
    }
}

/// Collects audit events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Names of the recorded events, in order
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(AuditEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
