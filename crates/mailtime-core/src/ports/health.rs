//! Health status records shared by storage adapters and schedulers.

use serde::{Deserialize, Serialize};

/// Round-trip check result. Never an error: failures are described, not raised.
///
/// `code` mirrors HTTP semantics so the record can be returned as-is from a
/// health endpoint: 200 OK, 500 backend error, 503 not (yet) serviceable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// Adapter exists but no engine has been bound to it yet.
    NotBound,
    Unavailable,
    Error,
}

impl HealthReport {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            code: 200,
            detail: None,
        }
    }

    pub fn not_bound() -> Self {
        Self {
            status: HealthStatus::NotBound,
            code: 503,
            detail: Some("mail queue not yet bound to the storage adapter".to_string()),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unavailable,
            code: 503,
            detail: Some(detail.into()),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            code: 500,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}
