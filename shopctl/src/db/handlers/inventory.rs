//! Database repository for the singleton settings row, which holds the shared stock counter.
//!
//! Every stock mutation is a single conditional `UPDATE`, so concurrent reservations can never
//! oversell and the counter can never drop below zero.

use crate::db::{
    errors::Result,
    models::settings::{SETTINGS_ID, SettingsDBResponse, SettingsUpdateDBRequest},
};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Inventory<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Inventory<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn settings(&mut self) -> Result<SettingsDBResponse> {
        let settings = sqlx::query_as::<_, SettingsDBResponse>("SELECT * FROM settings WHERE id = ?")
            .bind(SETTINGS_ID)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(settings)
    }

    #[instrument(skip(self), err)]
    pub async fn stock(&mut self) -> Result<i64> {
        let stock = sqlx::query_scalar::<_, i64>("SELECT total_stock FROM settings WHERE id = ?")
            .bind(SETTINGS_ID)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(stock)
    }

    /// Overwrite the stock, clamping negative input to zero.
    #[instrument(skip(self), err)]
    pub async fn set_stock(&mut self, value: i64) -> Result<i64> {
        let stock = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE settings SET total_stock = MAX(0, ?)
            WHERE id = ?
            RETURNING total_stock
            "#,
        )
        .bind(value)
        .bind(SETTINGS_ID)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(stock)
    }

    /// Add a signed delta to the stock, flooring the result at zero.
    #[instrument(skip(self), err)]
    pub async fn adjust_stock(&mut self, delta: i64) -> Result<i64> {
        let stock = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE settings SET total_stock = MAX(0, total_stock + ?)
            WHERE id = ?
            RETURNING total_stock
            "#,
        )
        .bind(delta)
        .bind(SETTINGS_ID)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(stock)
    }

    /// Take `amount` units if at least that many remain.
    ///
    /// Returns the remaining stock on success and `None` when there is not enough (or `amount`
    /// is not positive). Nothing changes on `None`.
    #[instrument(skip(self), err)]
    pub async fn try_reserve(&mut self, amount: i64) -> Result<Option<i64>> {
        if amount <= 0 {
            return Ok(None);
        }

        let remaining = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE settings SET total_stock = total_stock - ?1
            WHERE id = ?2 AND total_stock >= ?1
            RETURNING total_stock
            "#,
        )
        .bind(amount)
        .bind(SETTINGS_ID)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(remaining)
    }

    /// Apply the non-`None` fields of a settings patch.
    #[instrument(skip(self, patch), err)]
    pub async fn update_settings(&mut self, patch: &SettingsUpdateDBRequest) -> Result<SettingsDBResponse> {
        let settings = sqlx::query_as::<_, SettingsDBResponse>(
            r#"
            UPDATE settings SET
                bank_name = COALESCE(?, bank_name),
                account_number = COALESCE(?, account_number),
                account_holder = COALESCE(?, account_holder),
                panel_channel_id = COALESCE(?, panel_channel_id),
                panel_message_id = COALESCE(?, panel_message_id),
                secure_channel_id = COALESCE(?, secure_channel_id),
                review_webhook_url = COALESCE(?, review_webhook_url),
                buylog_webhook_url = COALESCE(?, buylog_webhook_url)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&patch.bank_name)
        .bind(&patch.account_number)
        .bind(&patch.account_holder)
        .bind(&patch.panel_channel_id)
        .bind(&patch.panel_message_id)
        .bind(&patch.secure_channel_id)
        .bind(&patch.review_webhook_url)
        .bind(&patch.buylog_webhook_url)
        .bind(SETTINGS_ID)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(settings)
    }
}
