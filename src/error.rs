//! Error taxonomy for sync attempts.
//!
//! Every failure inside an attempt is reduced to a [`SyncError`] whose kind decides two things:
//! whether `fetch_records` may be retried in-process, and the human-readable prefix of the
//! message stored on the execution record.

use serde::{Deserialize, Serialize};

/// Classified failure raised by adapters, the credential store or the warehouse loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    #[serde(flatten)]
    pub kind: SyncErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Missing or invalid connection configuration, unsupported source type.
    Configuration,
    /// Invalid, expired or unrefreshable credential.
    Unauthorized,
    /// Provider throttling, optionally with a server-supplied wait.
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Momentary provider or network failure.
    Transient,
    /// Load job failure or schema conflict.
    Warehouse,
    /// Provider rejected the request and retrying will not help.
    Permanent,
    /// Failure inside this service (database, timeout, aborted task).
    Internal,
}

impl SyncError {
    fn new<S: Into<String>>(kind: SyncErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Configuration, message)
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Unauthorized, message)
    }

    pub fn rate_limited<S: Into<String>>(retry_after_secs: Option<u64>, message: S) -> Self {
        Self::new(SyncErrorKind::RateLimited { retry_after_secs }, message)
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Transient, message)
    }

    pub fn warehouse<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Warehouse, message)
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Permanent, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(SyncErrorKind::Internal, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Only throttling and transient provider failures are retried within an attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            SyncErrorKind::Transient | SyncErrorKind::RateLimited { .. }
        )
    }

    /// Server-supplied wait for throttled requests.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self.kind {
            SyncErrorKind::RateLimited { retry_after_secs } => retry_after_secs,
            _ => None,
        }
    }

    /// Short label for metrics and structured logs.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            SyncErrorKind::Configuration => "configuration",
            SyncErrorKind::Unauthorized => "unauthorized",
            SyncErrorKind::RateLimited { .. } => "rate_limited",
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::Warehouse => "warehouse",
            SyncErrorKind::Permanent => "permanent",
            SyncErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.kind {
            SyncErrorKind::Configuration => "Configuration error",
            SyncErrorKind::Unauthorized => "Authorization error",
            SyncErrorKind::RateLimited { .. } => "Rate limited by provider",
            SyncErrorKind::Transient => "Transient provider error",
            SyncErrorKind::Warehouse => "Warehouse error",
            SyncErrorKind::Permanent => "Provider error",
            SyncErrorKind::Internal => "Internal error",
        };
        write!(f, "{}: {}", prefix, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::permanent(format!("malformed provider response: {err}"))
        } else if err.is_builder() {
            SyncError::configuration(format!("invalid request: {err}"))
        } else {
            SyncError::transient(format!("network error: {err}"))
        }
    }
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        SyncError::internal(format!("database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(SyncError::transient("503").is_retryable());
        assert!(SyncError::rate_limited(Some(30), "slow down").is_retryable());
        assert!(!SyncError::unauthorized("expired").is_retryable());
        assert!(!SyncError::configuration("missing").is_retryable());
        assert!(!SyncError::warehouse("load failed").is_retryable());
        assert!(!SyncError::permanent("bad query").is_retryable());
    }

    #[test]
    fn display_prefixes_kind() {
        let err = SyncError::unauthorized("no refresh token available");
        assert_eq!(
            err.to_string(),
            "Authorization error: no refresh token available"
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let err = SyncError::rate_limited(Some(60), "quota").with_details(serde_json::json!({
            "code": 17
        }));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "rate_limited");
        assert_eq!(value["retry_after_secs"], 60);
        assert_eq!(value["details"]["code"], 17);
    }
}
