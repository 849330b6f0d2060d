//! Shared stock counter and storefront settings.
//!
//! There is one stock counter for the whole store. `reserve` is the only operation that races
//! with other buyers, and it is a single conditional `UPDATE`, so two buyers can never both take
//! the last units. Orders reserve through the same repository call inside their own transaction
//! (see [`crate::orders`]).

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::db::handlers::Inventory;
use crate::db::models::settings::{SettingsDBResponse, SettingsUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::types::{Actor, Operation};

/// How an administrator changes the stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryAdjustment {
    Set,
    Increment,
    Decrement,
}

#[derive(Clone)]
pub struct InventoryManager {
    pool: SqlitePool,
}

impl InventoryManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn stock(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Ok(Inventory::new(&mut conn).stock().await?)
    }

    /// Overwrite the stock. Negative values clamp to zero.
    #[instrument(skip(self), err)]
    pub async fn set_stock(&self, value: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let stock = Inventory::new(&mut conn).set_stock(value).await?;
        info!(stock, "Stock set");
        Ok(stock)
    }

    /// Add a signed delta. The result clamps to zero.
    #[instrument(skip(self), err)]
    pub async fn adjust_stock(&self, delta: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let stock = Inventory::new(&mut conn).adjust_stock(delta).await?;
        info!(delta, stock, "Stock adjusted");
        Ok(stock)
    }

    /// Atomically take `amount` units, returning what is left.
    #[instrument(skip(self), err)]
    pub async fn reserve(&self, amount: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        match Inventory::new(&mut conn).try_reserve(amount).await? {
            Some(remaining) => {
                metrics::counter!("shopctl_reservations_total", "outcome" => "reserved").increment(1);
                Ok(remaining)
            }
            None => {
                metrics::counter!("shopctl_reservations_total", "outcome" => "insufficient").increment(1);
                Err(Error::InsufficientStock)
            }
        }
    }

    /// Administrator entry point for `set`, `inc` and `dec`.
    pub async fn adjust_inventory(&self, actor: &Actor, adjustment: InventoryAdjustment, value: i64) -> Result<i64> {
        actor.ensure_admin(Operation::AdjustInventory)?;

        match adjustment {
            InventoryAdjustment::Set => self.set_stock(value).await,
            InventoryAdjustment::Increment => self.adjust_stock(value).await,
            InventoryAdjustment::Decrement => {
                let delta = value.checked_neg().ok_or_else(|| Error::InvalidInput {
                    message: format!("Cannot decrement stock by {value}"),
                })?;
                self.adjust_stock(delta).await
            }
        }
    }

    pub async fn settings(&self) -> Result<SettingsDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Ok(Inventory::new(&mut conn).settings().await?)
    }

    #[instrument(skip(self, patch), fields(actor = %actor.id), err)]
    pub async fn update_settings(&self, actor: &Actor, patch: &SettingsUpdateDBRequest) -> Result<SettingsDBResponse> {
        actor.ensure_admin(Operation::UpdateSettings)?;

        let mut conn = self.pool.acquire().await?;
        let settings = Inventory::new(&mut conn).update_settings(patch).await?;
        info!("Settings updated");
        Ok(settings)
    }
}
