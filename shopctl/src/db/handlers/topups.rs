//! Database repository for balance top-ups.

use crate::db::{
    errors::Result,
    models::topups::{TopupCreateDBRequest, TopupDBResponse, TopupStatus},
};
use crate::types::{TopupId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Topups<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Topups<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, amount = request.amount), err)]
    pub async fn create(&mut self, request: &TopupCreateDBRequest, now: DateTime<Utc>) -> Result<TopupDBResponse> {
        let topup = sqlx::query_as::<_, TopupDBResponse>(
            r#"
            INSERT INTO topups (user_id, depositor_name, amount, status, created_at)
            VALUES (?, ?, ?, 'waiting', ?)
            RETURNING *
            "#,
        )
        .bind(&request.user_id)
        .bind(&request.depositor_name)
        .bind(request.amount)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(topup)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: TopupId) -> Result<Option<TopupDBResponse>> {
        let topup = sqlx::query_as::<_, TopupDBResponse>("SELECT * FROM topups WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(topup)
    }

    /// waiting -> approved/rejected. Returns `None` if the request is no longer waiting.
    #[instrument(skip(self), err)]
    pub async fn resolve(
        &mut self,
        id: TopupId,
        status: TopupStatus,
        resolved_by: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<TopupDBResponse>> {
        let topup = sqlx::query_as::<_, TopupDBResponse>(
            r#"
            UPDATE topups
            SET status = ?, resolved_by = ?, resolved_at = ?
            WHERE id = ? AND status = 'waiting'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(resolved_by)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(topup)
    }

    #[instrument(skip(self), err)]
    pub async fn list_by_status(&mut self, status: TopupStatus) -> Result<Vec<TopupDBResponse>> {
        let topups = sqlx::query_as::<_, TopupDBResponse>("SELECT * FROM topups WHERE status = ? ORDER BY id ASC")
            .bind(status)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(topups)
    }
}
