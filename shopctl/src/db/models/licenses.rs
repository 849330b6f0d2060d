//! Database models for license codes, active licenses and cleanup markers.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Duration class of a license code.
///
/// Stored as the code suffix (`7D`, `30D`, `PERM`). Rows written by older tooling may carry
/// any other suffix; those are kept verbatim and redeem as a one-unit license.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LicenseKind {
    Short,
    Long,
    Permanent,
    Other(String),
}

impl LicenseKind {
    pub fn code(&self) -> &str {
        match self {
            LicenseKind::Short => "7D",
            LicenseKind::Long => "30D",
            LicenseKind::Permanent => "PERM",
            LicenseKind::Other(code) => code,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, LicenseKind::Permanent)
    }

    /// Parse the user-facing names accepted by the CLI and commands.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "short" | "7d" => Some(LicenseKind::Short),
            "long" | "30d" => Some(LicenseKind::Long),
            "permanent" | "perm" => Some(LicenseKind::Permanent),
            _ => None,
        }
    }
}

impl From<String> for LicenseKind {
    fn from(code: String) -> Self {
        match code.as_str() {
            "7D" => LicenseKind::Short,
            "30D" => LicenseKind::Long,
            "PERM" => LicenseKind::Permanent,
            _ => LicenseKind::Other(code),
        }
    }
}

impl From<LicenseKind> for String {
    fn from(kind: LicenseKind) -> Self {
        kind.code().to_string()
    }
}

impl fmt::Display for LicenseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Database response for a redemption code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseCodeDBResponse {
    pub code: String,
    #[sqlx(try_from = "String")]
    pub kind: LicenseKind,
    pub created_at: DateTime<Utc>,
    pub redeemed_by: Option<UserId>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// Database request for activating (or replacing) a user's license
#[derive(Debug, Clone)]
pub struct LicenseUpsertDBRequest {
    pub user_id: UserId,
    pub code: String,
    pub kind: LicenseKind,
    pub activated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Database response for an active license row. `expires_at` is `None` for permanent licenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseDBResponse {
    pub user_id: UserId,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub kind: LicenseKind,
    pub activated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LicenseDBResponse {
    /// Permanent, or expiring strictly after `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.kind.is_permanent() || self.expires_at.is_some_and(|expires_at| expires_at > now)
    }
}

/// A license selected by the sweeper: expired and not yet cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ExpiredLicense {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Idempotency marker written when a user's expiry has been processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CleanupRecordDBResponse {
    pub user_id: UserId,
    pub cleaned_at: DateTime<Utc>,
}
