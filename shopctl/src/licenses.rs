//! License codes and the licenses they activate.
//!
//! # Codes
//!
//! Codes look like `Wind-Banner-7Q2KD-M0XAB-99ZPL-30D`: the configured prefix, three groups of
//! five characters from `A-Z0-9` (about 77 bits), and the duration class. A code is single use:
//! its redeemer is written once, in the same transaction that activates the license.
//!
//! # Licenses
//!
//! Each user holds at most one license. Redeeming a new code replaces the current license rather
//! than extending it. Time-limited licenses expire `units × licenses.unit` after activation and
//! are cleaned up by the [`crate::sweeper`].

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rand::prelude::RngExt;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::errors::DbError;
use crate::db::handlers::{LicenseCleanups, LicenseCodes, Licenses};
use crate::db::models::licenses::{LicenseCodeDBResponse, LicenseDBResponse, LicenseKind, LicenseUpsertDBRequest};
use crate::errors::{Error, Result};
use crate::grants::GrantService;
use crate::notifications::{Event, Notifications};
use crate::types::{Actor, Operation, UserId};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GROUP_LEN: usize = 5;
const GROUPS: usize = 3;

/// Source of candidate codes.
pub trait CodeSource: Send + Sync {
    fn generate(&self, prefix: &str, kind: &LicenseKind) -> String;
}

/// Uniformly random codes from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn generate(&self, prefix: &str, kind: &LicenseKind) -> String {
        let mut rng = rand::rng();
        let groups: Vec<String> = (0..GROUPS)
            .map(|_| {
                (0..GROUP_LEN)
                    .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
                    .collect()
            })
            .collect();

        format!("{prefix}-{}-{}", groups.join("-"), kind.code())
    }
}

/// What `queryLicense` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LicenseStatus {
    None,
    Licensed {
        kind: LicenseKind,
        activated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        is_active: bool,
    },
}

impl LicenseStatus {
    fn from_license(license: LicenseDBResponse, now: DateTime<Utc>) -> Self {
        let is_active = license.is_active_at(now);
        LicenseStatus::Licensed {
            kind: license.kind,
            activated_at: license.activated_at,
            expires_at: license.expires_at,
            is_active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LicenseStatus::Licensed { is_active: true, .. })
    }
}

#[derive(Clone)]
pub struct LicenseService {
    pool: SqlitePool,
    config: Arc<Config>,
    codes: Arc<dyn CodeSource>,
    grants: GrantService,
    notifications: Notifications,
}

impl LicenseService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        codes: Arc<dyn CodeSource>,
        grants: GrantService,
        notifications: Notifications,
    ) -> Self {
        Self {
            pool,
            config,
            codes,
            grants,
            notifications,
        }
    }

    /// Issue one fresh code. A generated code that already exists is regenerated, never
    /// overwritten.
    #[instrument(skip(self), fields(actor = %actor.id), err)]
    pub async fn issue_code(&self, actor: &Actor, kind: LicenseKind) -> Result<LicenseCodeDBResponse> {
        actor.ensure_admin(Operation::IssueCode)?;

        let attempts = self.config.licenses.max_generation_attempts;
        let mut conn = self.pool.acquire().await?;

        for attempt in 1..=attempts {
            let candidate = self.codes.generate(&self.config.licenses.code_prefix, &kind);
            match LicenseCodes::new(&mut conn).insert(&candidate, &kind, Utc::now()).await {
                Ok(code) => {
                    metrics::counter!("shopctl_license_codes_issued_total", "kind" => kind.code().to_string()).increment(1);
                    info!(kind = %kind, "License code issued");
                    return Ok(code);
                }
                Err(DbError::UniqueViolation { .. }) => {
                    warn!(attempt, "Generated license code already exists, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::CodeCollision { attempts })
    }

    pub async fn issue_codes(&self, actor: &Actor, kind: LicenseKind, count: u32) -> Result<Vec<LicenseCodeDBResponse>> {
        if count == 0 {
            return Err(Error::InvalidInput {
                message: "Count must be at least 1".to_string(),
            });
        }

        let mut issued = Vec::with_capacity(count as usize);
        for _ in 0..count {
            issued.push(self.issue_code(actor, kind.clone()).await?);
        }
        Ok(issued)
    }

    pub async fn redeem(&self, user: &UserId, code: &str) -> Result<LicenseDBResponse> {
        self.redeem_at(user, code, Utc::now()).await
    }

    /// Redeem `code` for `user` as of `now`.
    ///
    /// Claims the code, replaces the user's license and clears any cleanup marker in one
    /// transaction, then provisions grants and notifies as best-effort follow-ups.
    #[instrument(skip(self, code), fields(user_id = %user), err)]
    pub async fn redeem_at(&self, user: &UserId, code: &str, now: DateTime<Utc>) -> Result<LicenseDBResponse> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::UnknownCode);
        }

        let mut tx = self.pool.begin().await?;

        let Some(claimed) = LicenseCodes::new(&mut tx).mark_redeemed(code, user, now).await? else {
            let existing = LicenseCodes::new(&mut tx).get(code).await?;
            tx.rollback().await?;
            return Err(match existing {
                Some(_) => Error::CodeAlreadyUsed,
                None => Error::UnknownCode,
            });
        };

        let expires_at = self.expiry_for(&claimed.kind, now)?;
        let license = Licenses::new(&mut tx)
            .upsert(&LicenseUpsertDBRequest {
                user_id: user.clone(),
                code: claimed.code.clone(),
                kind: claimed.kind.clone(),
                activated_at: now,
                expires_at,
            })
            .await?;
        LicenseCleanups::new(&mut tx).clear(user).await?;

        tx.commit().await?;
        metrics::counter!("shopctl_licenses_redeemed_total", "kind" => license.kind.code().to_string()).increment(1);
        info!(kind = %license.kind, expires_at = ?license.expires_at, "License activated");

        self.grants.sync(user).await;
        self.notifications
            .user(
                user,
                Event::LicenseActivated {
                    kind: license.kind.clone(),
                    expires_at: license.expires_at,
                },
            )
            .await;

        Ok(license)
    }

    pub async fn query_status(&self, user: &UserId) -> Result<LicenseStatus> {
        self.query_status_at(user, Utc::now()).await
    }

    pub async fn query_status_at(&self, user: &UserId, now: DateTime<Utc>) -> Result<LicenseStatus> {
        let mut conn = self.pool.acquire().await?;
        let status = match Licenses::new(&mut conn).get(user).await? {
            Some(license) => LicenseStatus::from_license(license, now),
            None => LicenseStatus::None,
        };
        Ok(status)
    }

    pub async fn has_active_license(&self, user: &UserId) -> Result<bool> {
        Ok(self.query_status(user).await?.is_active())
    }

    fn expiry_for(&self, kind: &LicenseKind, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(units) = self.config.licenses.units_for(kind) else {
            return Ok(None);
        };

        let out_of_range = || Error::Internal {
            operation: format!("compute expiry for {units} license units"),
        };
        let duration = self.config.licenses.unit.checked_mul(units).ok_or_else(out_of_range)?;
        let duration = TimeDelta::from_std(duration).map_err(|_| out_of_range())?;
        now.checked_add_signed(duration).map(Some).ok_or_else(out_of_range)
    }
}
