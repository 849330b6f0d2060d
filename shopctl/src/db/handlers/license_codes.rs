//! Database repository for issued license codes.

use crate::db::{
    errors::Result,
    models::licenses::{LicenseCodeDBResponse, LicenseKind},
};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct LicenseCodes<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> LicenseCodes<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Insert a fresh, unredeemed code. A duplicate code surfaces as
    /// [`DbError::UniqueViolation`](crate::db::errors::DbError::UniqueViolation).
    #[instrument(skip(self, code), fields(kind = %kind), err)]
    pub async fn insert(&mut self, code: &str, kind: &LicenseKind, now: DateTime<Utc>) -> Result<LicenseCodeDBResponse> {
        let row = sqlx::query_as::<_, LicenseCodeDBResponse>(
            r#"
            INSERT INTO license_codes (code, kind, created_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(kind.code())
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self, code), err)]
    pub async fn get(&mut self, code: &str) -> Result<Option<LicenseCodeDBResponse>> {
        let row = sqlx::query_as::<_, LicenseCodeDBResponse>("SELECT * FROM license_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row)
    }

    /// Claim an unredeemed code for `user_id`. Returns `None` if the code is unknown or was
    /// already claimed; the redeemer of a code is written once and never changes.
    #[instrument(skip(self, code), fields(user_id = %user_id), err)]
    pub async fn mark_redeemed(
        &mut self,
        code: &str,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<LicenseCodeDBResponse>> {
        let row = sqlx::query_as::<_, LicenseCodeDBResponse>(
            r#"
            UPDATE license_codes SET redeemed_by = ?, redeemed_at = ?
            WHERE code = ? AND redeemed_by IS NULL
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(code)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row)
    }
}
