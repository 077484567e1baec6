use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tenure_core::{AttemptFailure, Backoff, BackoffConfig, ExponentialBackoff, LockError, LockRow, ReleaseOutcome};

// ─── Validation Helpers ─────────────────────────────────────────────────────

const MAX_ID_LEN: usize = 256;

pub fn validate_id(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }
    if value.len() > MAX_ID_LEN {
        return Err(format!("{} must be at most {} bytes", field, MAX_ID_LEN));
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

/// Server-side ceiling on the retry schedule a caller may request. A waiting
/// acquisition holds a blocking thread until its schedule runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireLimits {
    pub max_attempts: u32,
    pub max_total_wait: Duration,
}

impl AcquireLimits {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
    pub const DEFAULT_MAX_TOTAL_WAIT_MS: u64 = 300_000;
}

impl Default for AcquireLimits {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            max_total_wait: Duration::from_millis(Self::DEFAULT_MAX_TOTAL_WAIT_MS),
        }
    }
}

#[derive(Deserialize)]
pub struct AcquireLockRequest {
    pub resource_id: String,
    /// Generated when omitted
    pub client_id: Option<String>,
    /// Single attempt, no retries
    #[serde(default)]
    pub no_wait: bool,
    /// Retry schedule; the default schedule when omitted
    pub backoff: Option<BackoffConfig>,
}

impl AcquireLockRequest {
    pub fn validate(&self, limits: &AcquireLimits) -> Result<(), String> {
        validate_id("resource_id", &self.resource_id)?;
        if let Some(client_id) = &self.client_id {
            validate_id("client_id", client_id)?;
        }
        if self.no_wait && self.backoff.is_some() {
            return Err("no_wait and backoff are mutually exclusive".to_string());
        }
        let backoff = self.backoff()?;
        if backoff.max_attempts() > limits.max_attempts {
            return Err(format!(
                "backoff.max_attempts must be at most {}",
                limits.max_attempts
            ));
        }
        let total_wait = backoff.total_wait();
        if total_wait > limits.max_total_wait {
            return Err(format!(
                "backoff waits {}ms in total, at most {}ms allowed",
                total_wait.as_millis(),
                limits.max_total_wait.as_millis()
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Result<ExponentialBackoff, String> {
        if self.no_wait {
            return Ok(ExponentialBackoff::no_retry());
        }
        match &self.backoff {
            Some(config) => ExponentialBackoff::try_from(config).map_err(|e| format!("backoff: {}", e)),
            None => Ok(ExponentialBackoff::default()),
        }
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            reason: None,
            attempts: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            reason: None,
            attempts: None,
        }
    }

    fn with_reason(mut self, reason: &'static str, attempts: Option<u32>) -> Self {
        self.reason = Some(reason);
        self.attempts = attempts;
        self
    }
}

#[derive(Serialize)]
pub struct LockInfo {
    pub resource_id: String,
    pub client_id: String,
    pub sequence_no: i64,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

impl LockInfo {
    pub fn from_row(row: &LockRow, now: DateTime<Utc>) -> Self {
        let expires_at = row.expiry_time();
        Self {
            resource_id: row.resource_id.to_string(),
            client_id: row.client_id.to_string(),
            sequence_no: row.sequence_no,
            expires_at,
            expired: expires_at <= now,
        }
    }
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
    pub outcome: &'static str,
}

impl From<ReleaseOutcome> for ReleaseResponse {
    fn from(outcome: ReleaseOutcome) -> Self {
        match outcome {
            ReleaseOutcome::Released => Self {
                released: true,
                outcome: "RELEASED",
            },
            ReleaseOutcome::NotHeld => Self {
                released: false,
                outcome: "NOT_HELD",
            },
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Error Mapping ──────────────────────────────────────────────────────────

pub fn failure_reason(cause: &AttemptFailure) -> &'static str {
    match cause {
        AttemptFailure::LockUnavailable { .. } => "LOCK_UNAVAILABLE",
        AttemptFailure::ReclaimRaceLost => "RECLAIM_RACE_LOST",
    }
}

/// Map a lock error onto an HTTP status and error body.
pub fn error_response(err: &LockError) -> (StatusCode, ApiResponse<()>) {
    let body = ApiResponse::err(err.to_string());
    match err {
        LockError::AcquisitionExhausted {
            attempts,
            last_cause,
            ..
        } => (
            StatusCode::CONFLICT,
            body.with_reason(failure_reason(last_cause), Some(*attempts)),
        ),
        LockError::Cancelled { attempts, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            body.with_reason("CANCELLED", Some(*attempts)),
        ),
        LockError::Connection(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            body.with_reason("STORE_UNREACHABLE", None),
        ),
        LockError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, body),
        LockError::Store(_) | LockError::Release { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, body.with_reason("STORE_FAILURE", None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_core::ResourceId;

    fn request(json: &str) -> AcquireLockRequest {
        serde_json::from_str(json).unwrap()
    }

    fn validate(json: &str) -> Result<(), String> {
        request(json).validate(&AcquireLimits::default())
    }

    #[test]
    fn test_acquire_request_validation() {
        assert!(validate(r#"{"resource_id": "orders/1"}"#).is_ok());
        assert!(validate(r#"{"resource_id": "  "}"#).is_err());
        assert!(validate(r#"{"resource_id": "orders/1", "client_id": ""}"#).is_err());
        assert!(validate(
            r#"{"resource_id": "orders/1", "no_wait": true,
                "backoff": {"max_attempts": 1, "initial_interval_ms": 10, "multiplier": 1.0}}"#
        )
        .is_err());
        assert!(validate(
            r#"{"resource_id": "orders/1",
                "backoff": {"max_attempts": 1, "initial_interval_ms": 0, "multiplier": 1.0}}"#
        )
        .is_err());
    }

    #[test]
    fn test_acquire_request_backoff_limits() {
        let limits = AcquireLimits {
            max_attempts: 5,
            max_total_wait: Duration::from_secs(10),
        };
        let check = |json: &str| request(json).validate(&limits);

        assert!(check(r#"{"resource_id": "r"}"#).is_ok());
        assert!(check(r#"{"resource_id": "r", "no_wait": true}"#).is_ok());
        assert!(check(
            r#"{"resource_id": "r",
                "backoff": {"max_attempts": 5, "initial_interval_ms": 2000, "multiplier": 1.0}}"#
        )
        .is_ok());

        let err = check(
            r#"{"resource_id": "r",
                "backoff": {"max_attempts": 4294967295, "initial_interval_ms": 3600000000, "multiplier": 1.0}}"#,
        )
        .unwrap_err();
        assert!(err.contains("max_attempts"));

        let err = check(
            r#"{"resource_id": "r",
                "backoff": {"max_attempts": 3, "initial_interval_ms": 3600000000, "multiplier": 1.0}}"#,
        )
        .unwrap_err();
        assert!(err.contains("in total"));

        // Growth alone can push a short schedule over the ceiling
        assert!(check(
            r#"{"resource_id": "r",
                "backoff": {"max_attempts": 5, "initial_interval_ms": 1000, "multiplier": 10.0}}"#
        )
        .is_err());
    }

    #[test]
    fn test_acquire_request_backoff_selection() {
        let no_wait = request(r#"{"resource_id": "r", "no_wait": true}"#);
        assert_eq!(no_wait.backoff().unwrap().max_attempts(), 0);

        let default = request(r#"{"resource_id": "r"}"#);
        assert_eq!(default.backoff().unwrap(), ExponentialBackoff::default());
    }

    #[test]
    fn test_error_status_mapping() {
        let exhausted = LockError::AcquisitionExhausted {
            resource_id: ResourceId::new("r"),
            attempts: 4,
            last_cause: AttemptFailure::ReclaimRaceLost,
        };
        let (status, body) = error_response(&exhausted);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason, Some("RECLAIM_RACE_LOST"));
        assert_eq!(body.attempts, Some(4));

        let (status, _) = error_response(&LockError::Connection("refused".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = error_response(&LockError::Store("disk".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
