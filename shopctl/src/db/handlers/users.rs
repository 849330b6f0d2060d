//! Database repository for users.

use crate::db::{errors::Result, models::users::UserDBResponse};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Users<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Create the user if this is the first time we see them. Existing rows are left alone.
    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn ensure(&mut self, id: &UserId, tier: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, balance, total_spent, tier, created_at)
            VALUES (?, 0, 0, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(tier)
        .bind(now)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get_by_id(&mut self, id: &UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Add `amount` to the user's balance, returning the updated row.
    ///
    /// Returns `None` (and changes nothing) when the user is unknown or the new balance would
    /// not fit in an `i64`.
    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn credit(&mut self, id: &UserId, amount: i64) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET balance = balance + ?1
            WHERE id = ?2 AND balance <= 9223372036854775807 - ?1
            RETURNING *
            "#,
        )
        .bind(amount)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    /// Move `amount` from balance to total spent if the balance covers it.
    ///
    /// Returns `None` (and changes nothing) when the balance is too low.
    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn charge(&mut self, id: &UserId, amount: i64) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users
            SET balance = balance - ?1, total_spent = total_spent + ?1
            WHERE id = ?2 AND balance >= ?1
            RETURNING *
            "#,
        )
        .bind(amount)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn set_tier(&mut self, id: &UserId, tier: &str) -> Result<()> {
        sqlx::query("UPDATE users SET tier = ? WHERE id = ?")
            .bind(tier)
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }
}
