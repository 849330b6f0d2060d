//! Database repositories for active licenses and their cleanup markers.
//!
//! A user has at most one `licenses` row and at most one `license_cleanups` row, and never both
//! at once: redemption removes the marker, expiry processing inserts it while deleting the
//! license in the same transaction.

use crate::db::{
    errors::Result,
    models::licenses::{CleanupRecordDBResponse, ExpiredLicense, LicenseDBResponse, LicenseUpsertDBRequest},
};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Licenses<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Licenses<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Insert or replace the user's license.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, kind = %request.kind), err)]
    pub async fn upsert(&mut self, request: &LicenseUpsertDBRequest) -> Result<LicenseDBResponse> {
        let license = sqlx::query_as::<_, LicenseDBResponse>(
            r#"
            INSERT INTO licenses (user_id, code, kind, activated_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                code = excluded.code,
                kind = excluded.kind,
                activated_at = excluded.activated_at,
                expires_at = excluded.expires_at
            RETURNING *
            "#,
        )
        .bind(&request.user_id)
        .bind(&request.code)
        .bind(request.kind.code())
        .bind(request.activated_at)
        .bind(request.expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(license)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get(&mut self, user_id: &UserId) -> Result<Option<LicenseDBResponse>> {
        let license = sqlx::query_as::<_, LicenseDBResponse>("SELECT * FROM licenses WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(license)
    }

    /// Time-limited licenses whose expiry is at or before `now` and that have no cleanup marker.
    #[instrument(skip(self), err)]
    pub async fn list_expired_uncleaned(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ExpiredLicense>> {
        let expired = sqlx::query_as::<_, ExpiredLicense>(
            r#"
            SELECT l.user_id, l.expires_at
            FROM licenses l
            LEFT JOIN license_cleanups c ON c.user_id = l.user_id
            WHERE l.expires_at IS NOT NULL
              AND l.expires_at <= ?
              AND c.user_id IS NULL
            ORDER BY l.expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(expired)
    }

    /// Delete the user's license only if it is still expired at `now`. A license replaced by a
    /// fresh redemption in the meantime survives.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn delete_expired(&mut self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM licenses
            WHERE user_id = ? AND expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct LicenseCleanups<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> LicenseCleanups<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Record that the user's expiry was processed. Returns `false` if a marker already exists.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn insert(&mut self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO license_cleanups (user_id, cleaned_at)
            VALUES (?, ?)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn clear(&mut self, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM license_cleanups WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get(&mut self, user_id: &UserId) -> Result<Option<CleanupRecordDBResponse>> {
        let record = sqlx::query_as::<_, CleanupRecordDBResponse>("SELECT * FROM license_cleanups WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM license_cleanups")
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}
