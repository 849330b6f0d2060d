//! Order state machine.
//!
//! ```text
//! requested ──(quantity + reserve)──> queued ──(admin)──> fulfilled
//!     │                                  │
//!     └──────────────> canceled <────────┘
//! ```
//!
//! An order only reaches `queued` in the same transaction that took its quantity out of stock.
//! If the reservation fails nothing is written and the order stays `requested`, so the buyer can
//! retry with a smaller quantity.
//!
//! A user may have several `requested` orders. Supplying a quantity always binds to the most
//! recently opened one; older ones stay `requested` until canceled.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::config::Config;
use crate::db::handlers::{Inventory, Orders, Users};
use crate::db::models::orders::{OrderCreateDBRequest, OrderDBResponse, OrderStatus};
use crate::errors::{Error, Result};
use crate::notifications::{Event, Notifications};
use crate::types::{Actor, Operation, OrderId, UserId};

#[derive(Clone)]
pub struct OrderService {
    pool: SqlitePool,
    config: Arc<Config>,
    notifications: Notifications,
}

impl OrderService {
    pub fn new(pool: SqlitePool, config: Arc<Config>, notifications: Notifications) -> Self {
        Self {
            pool,
            config,
            notifications,
        }
    }

    /// Open a purchase intent. The quantity is supplied later with [`Self::set_order_quantity`].
    #[instrument(skip(self, fulfillment_method, recipient_handle), fields(user_id = %user), err)]
    pub async fn open_order(&self, user: &UserId, fulfillment_method: &str, recipient_handle: &str) -> Result<OrderId> {
        let fulfillment_method = fulfillment_method.trim();
        let recipient_handle = recipient_handle.trim();
        if fulfillment_method.is_empty() || recipient_handle.is_empty() {
            return Err(Error::InvalidInput {
                message: "Fulfillment method and recipient are required".to_string(),
            });
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Users::new(&mut tx).ensure(user, self.config.default_tier(), now).await?;
        let order = Orders::new(&mut tx)
            .create(
                &OrderCreateDBRequest {
                    user_id: user.clone(),
                    fulfillment_method: fulfillment_method.to_string(),
                    recipient_handle: recipient_handle.to_string(),
                },
                now,
            )
            .await?;
        tx.commit().await?;

        info!(order_id = order.id, "Order opened");
        Ok(order.id)
    }

    /// Supply the quantity for the user's active order, reserving it from stock.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn set_order_quantity(&self, user: &UserId, quantity: i64) -> Result<OrderDBResponse> {
        let order = {
            let mut conn = self.pool.acquire().await?;
            Orders::new(&mut conn).latest_requested(user).await?
        }
        .ok_or(Error::NoActiveOrder)?;

        let mut tx = self.pool.begin().await?;

        // The reservation is the guarding write: it serializes this transaction on the stock row
        let Some(remaining) = Inventory::new(&mut tx).try_reserve(quantity).await? else {
            tx.rollback().await?;
            metrics::counter!("shopctl_reservations_total", "outcome" => "insufficient").increment(1);
            return Err(Error::InsufficientStock);
        };

        let Some(queued) = Orders::new(&mut tx).mark_queued(order.id, quantity, Utc::now()).await? else {
            // Canceled or queued by a concurrent request since we looked it up
            tx.rollback().await?;
            return Err(Error::NoActiveOrder);
        };

        tx.commit().await?;
        metrics::counter!("shopctl_reservations_total", "outcome" => "reserved").increment(1);
        info!(order_id = queued.id, quantity, remaining, "Order queued");

        self.notifications
            .channel(
                self.config.notifications.fulfillment_channel.as_deref(),
                Event::FulfillmentRequested {
                    order_id: queued.id,
                    buyer: queued.user_id.clone(),
                    quantity: queued.requested_quantity,
                    fulfillment_method: queued.fulfillment_method.clone(),
                    recipient_handle: queued.recipient_handle.clone(),
                },
            )
            .await;

        Ok(queued)
    }

    /// Mark a queued order delivered and charge the buyer `quantity × unit_price`.
    #[instrument(skip(self), fields(actor = %actor.id), err)]
    pub async fn fulfill_order(&self, order_id: OrderId, actor: &Actor) -> Result<OrderDBResponse> {
        actor.ensure_admin(Operation::FulfillOrder)?;

        let mut tx = self.pool.begin().await?;

        let Some(order) = Orders::new(&mut tx).mark_fulfilled(order_id, Utc::now()).await? else {
            tx.rollback().await?;
            return Err(self.not_transitionable(order_id).await?);
        };

        let charge = order
            .requested_quantity
            .checked_mul(self.config.orders.unit_price)
            .ok_or_else(|| Error::InvalidInput {
                message: format!("Order {order_id} total is out of range"),
            })?;

        let mut users = Users::new(&mut tx);
        let Some(buyer) = users.charge(&order.user_id, charge).await? else {
            let available = users.get_by_id(&order.user_id).await?.map(|u| u.balance).unwrap_or_default();
            tx.rollback().await?;
            return Err(Error::InsufficientBalance {
                required: charge,
                available,
            });
        };
        users.set_tier(&buyer.id, self.config.tier_for(buyer.total_spent)).await?;

        tx.commit().await?;
        info!(order_id, charge, total_spent = buyer.total_spent, "Order fulfilled");

        self.notifications
            .user(
                &order.user_id,
                Event::OrderFulfilled {
                    order_id,
                    quantity: order.requested_quantity,
                    charged: charge,
                },
            )
            .await;

        Ok(order)
    }

    /// Cancel an order. Administrators may cancel any order, buyers only their own. A queued
    /// order's quantity goes back into stock in the same transaction.
    #[instrument(skip(self), fields(actor = %actor.id), err)]
    pub async fn cancel_order(&self, order_id: OrderId, actor: &Actor) -> Result<OrderDBResponse> {
        let existing = {
            let mut conn = self.pool.acquire().await?;
            Orders::new(&mut conn).get_by_id(order_id).await?
        }
        .ok_or_else(|| Error::not_found("Order", order_id))?;

        if !actor.is_admin && existing.user_id != actor.id {
            return Err(Error::NotAuthorized {
                action: Operation::CancelOrder,
            });
        }
        if existing.status.is_terminal() {
            return Err(Error::AlreadyResolved);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let (canceled, restocked) = if let Some(order) = Orders::new(&mut tx).cancel_queued(order_id, now).await? {
            Inventory::new(&mut tx).adjust_stock(order.requested_quantity).await?;
            let restocked = order.requested_quantity;
            (order, restocked)
        } else if let Some(order) = Orders::new(&mut tx).cancel_requested(order_id, now).await? {
            (order, 0)
        } else {
            tx.rollback().await?;
            return Err(Error::AlreadyResolved);
        };

        tx.commit().await?;
        info!(order_id, restocked, "Order canceled");

        self.notifications
            .user(&canceled.user_id, Event::OrderCanceled { order_id, restocked })
            .await;

        Ok(canceled)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Orders::new(&mut conn)
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| Error::not_found("Order", order_id))
    }

    pub async fn list_orders(&self, user: &UserId) -> Result<Vec<OrderDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Orders::new(&mut conn).list_for_user(user).await?)
    }

    /// Explain why a queued -> fulfilled transition matched nothing.
    async fn not_transitionable(&self, order_id: OrderId) -> Result<Error> {
        let order = self.get_order(order_id).await?;
        Ok(match order.status {
            OrderStatus::Requested => Error::InvalidInput {
                message: format!("Order {order_id} has no quantity yet"),
            },
            _ => Error::AlreadyResolved,
        })
    }
}
