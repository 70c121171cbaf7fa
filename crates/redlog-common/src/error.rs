//! Error types and error codes for Redlog
//!
//! This module defines:
//! - `RedlogError`: the error taxonomy every service surfaces
//! - `FieldErrors`: per-field validation failures for a whole record
//! - `ErrorCode`: Structured error codes for collaborator responses

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use validator::ValidationError;

/// Result type alias for Redlog operations
pub type RedlogResult<T> = Result<T, RedlogError>;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum RedlogError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("storage temporarily unavailable: {source}")]
    TransientIo {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("batch of {size} records exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Unexpected failure. The detail is kept for logging only.
    #[error("internal error")]
    Internal(String),
}

impl RedlogError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        RedlogError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        RedlogError::PermissionDenied(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        RedlogError::Conflict(reason.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        RedlogError::Internal(detail.into())
    }

    /// Single-field validation failure
    pub fn invalid_field(field: &str, error: ValidationError) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, error);
        RedlogError::Validation(errors)
    }

    /// Recover a typed error raised by a persistence backend.
    ///
    /// Backends raise `RedlogError` values through `anyhow`: `Conflict` for
    /// unique violations, `Internal` for rows that cannot be decoded. Anything
    /// else is treated as a storage failure worth retrying.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<RedlogError>() {
            Ok(typed) => typed,
            Err(err) => RedlogError::TransientIo { source: err.into() },
        }
    }

    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RedlogError::TransientIo { .. } | RedlogError::RateLimited { .. }
        )
    }

    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            RedlogError::Validation(_) => PARAMETER_VALIDATE_ERROR,
            RedlogError::Conflict(_) => RESOURCE_CONFLICT,
            RedlogError::PermissionDenied(_) => ACCESS_DENIED,
            RedlogError::NotFound { .. } => RESOURCE_NOT_FOUND,
            RedlogError::TransientIo { .. } => DATA_ACCESS_ERROR,
            RedlogError::RateLimited { .. } => RATE_LIMITED,
            RedlogError::BatchTooLarge { .. } => BATCH_TOO_LARGE,
            RedlogError::Internal(_) => SERVER_ERROR,
        }
    }

    /// Field map of a validation failure, if this is one
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            RedlogError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<FieldErrors> for RedlogError {
    fn from(value: FieldErrors) -> Self {
        RedlogError::Validation(value)
    }
}

/// Validation failures keyed by field name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<ValidationError>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, error: ValidationError) {
        self.0.entry(field.to_string()).or_default().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields with at least one failure
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[ValidationError]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, errors) in other.0 {
            self.0.entry(field).or_default().extend(errors);
        }
    }

    /// `Ok(())` when nothing failed, otherwise the collected map
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Display for FieldErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, errors) in &self.0 {
            for error in errors {
                if !first {
                    write!(f, "; ")?;
                }
                first = false;
                write!(f, "{}: {}", field, error.code)?;
            }
        }
        Ok(())
    }
}

/// Error code structure for collaborator responses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const ACCESS_DENIED: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "access denied",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
};

pub const RATE_LIMITED: ErrorCode<'static> = ErrorCode {
    code: 20429,
    message: "too many requests",
};

pub const BATCH_TOO_LARGE: ErrorCode<'static> = ErrorCode {
    code: 20413,
    message: "batch exceeds maximum size",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redlog_error_display() {
        let err = RedlogError::not_found("log", 42);
        assert_eq!(format!("{}", err), "log '42' not found");

        let err = RedlogError::permission_denied("record is locked by alice");
        assert_eq!(
            format!("{}", err),
            "permission denied: record is locked by alice"
        );

        let err = RedlogError::Internal("connection reset by peer".to_string());
        assert_eq!(format!("{}", err), "internal error");
    }

    #[test]
    fn test_from_store_keeps_the_cause() {
        let err = RedlogError::from_store(anyhow::anyhow!("disk full"));
        assert!(matches!(err, RedlogError::TransientIo { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "storage temporarily unavailable: disk full");

        let err = RedlogError::from_store(RedlogError::internal("corrupt log row 7").into());
        assert!(matches!(&err, RedlogError::Internal(detail) if detail == "corrupt log row 7"));
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), SERVER_ERROR);
        assert!(format!("{:?}", err).contains("corrupt log row 7"));
    }

    #[test]
    fn test_field_errors_collects_per_field() {
        let mut errors = FieldErrors::new();
        assert!(errors.is_empty());

        errors.add("internal_ip", ValidationError::new("invalid_ip"));
        errors.add("internal_ip", ValidationError::new("too_long"));
        errors.add("hostname", ValidationError::new("invalid_hostname"));

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("internal_ip").map(|e| e.len()), Some(2));
        assert!(errors.contains("hostname"));
        assert!(!errors.contains("domain"));
        assert_eq!(
            errors.to_string(),
            "hostname: invalid_hostname; internal_ip: invalid_ip; internal_ip: too_long"
        );
    }

    #[test]
    fn test_field_errors_serialize_as_map() {
        let mut errors = FieldErrors::new();
        errors.add("mac_address", ValidationError::new("invalid_mac"));
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["mac_address"][0]["code"], "invalid_mac");
    }

    #[test]
    fn test_from_store_recovers_typed_errors() {
        let raised = anyhow::Error::new(RedlogError::conflict("tag 'x' already exists"));
        assert!(matches!(
            RedlogError::from_store(raised),
            RedlogError::Conflict(_)
        ));

        let io = anyhow::anyhow!("connection refused");
        let err = RedlogError::from_store(io);
        assert!(matches!(err, RedlogError::TransientIo { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), DATA_ACCESS_ERROR);
    }

    #[test]
    fn test_error_code_constants() {
        assert_eq!(SUCCESS.code, 0);
        assert_eq!(ACCESS_DENIED.code, 10001);
        assert_eq!(
            RedlogError::BatchTooLarge { size: 51, max: 50 }.error_code(),
            BATCH_TOO_LARGE
        );
    }
}
