//! Database repository for orders.
//!
//! Status changes are compare-and-set updates: each transition names the status it expects to
//! leave, and a `None` return means another writer got there first.

use crate::db::{
    errors::Result,
    models::orders::{OrderCreateDBRequest, OrderDBResponse},
};
use crate::types::{OrderId, UserId};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Orders<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Orders<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id), err)]
    pub async fn create(&mut self, request: &OrderCreateDBRequest, now: DateTime<Utc>) -> Result<OrderDBResponse> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            INSERT INTO orders (user_id, fulfillment_method, recipient_handle, requested_quantity, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, 'requested', ?4, ?4)
            RETURNING *
            "#,
        )
        .bind(&request.user_id)
        .bind(&request.fulfillment_method)
        .bind(&request.recipient_handle)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(order)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: OrderId) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(order)
    }

    /// The user's most recently opened order that has not been given a quantity yet.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn latest_requested(&mut self, user_id: &UserId) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            SELECT * FROM orders
            WHERE user_id = ? AND status = 'requested'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(order)
    }

    /// requested -> queued, recording the quantity.
    #[instrument(skip(self), err)]
    pub async fn mark_queued(&mut self, id: OrderId, quantity: i64, now: DateTime<Utc>) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            UPDATE orders
            SET requested_quantity = ?, status = 'queued', updated_at = ?
            WHERE id = ? AND status = 'requested'
            RETURNING *
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(order)
    }

    /// queued -> fulfilled.
    #[instrument(skip(self), err)]
    pub async fn mark_fulfilled(&mut self, id: OrderId, now: DateTime<Utc>) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            UPDATE orders SET status = 'fulfilled', updated_at = ?
            WHERE id = ? AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(order)
    }

    /// queued -> canceled. The caller owns returning the reserved quantity to stock.
    #[instrument(skip(self), err)]
    pub async fn cancel_queued(&mut self, id: OrderId, now: DateTime<Utc>) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            UPDATE orders SET status = 'canceled', updated_at = ?
            WHERE id = ? AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(order)
    }

    /// requested -> canceled. Nothing was reserved yet.
    #[instrument(skip(self), err)]
    pub async fn cancel_requested(&mut self, id: OrderId, now: DateTime<Utc>) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(
            r#"
            UPDATE orders SET status = 'canceled', updated_at = ?
            WHERE id = ? AND status = 'requested'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn list_for_user(&mut self, user_id: &UserId) -> Result<Vec<OrderDBResponse>> {
        let orders = sqlx::query_as::<_, OrderDBResponse>("SELECT * FROM orders WHERE user_id = ? ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::orders::OrderStatus;
    use crate::test_utils::create_test_pool;

    fn request(user: &UserId) -> OrderCreateDBRequest {
        OrderCreateDBRequest {
            user_id: user.clone(),
            fulfillment_method: "gift".to_string(),
            recipient_handle: "someone#0001".to_string(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_latest_requested_picks_newest() {
        let (pool, _dir) = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let user = UserId::from("2001");
        Users::new(&mut conn).ensure(&user, "bronze", Utc::now()).await.unwrap();

        let mut repo = Orders::new(&mut conn);
        let first = repo.create(&request(&user), Utc::now()).await.unwrap();
        let second = repo.create(&request(&user), Utc::now()).await.unwrap();
        assert_eq!(first.status, OrderStatus::Requested);
        assert_eq!(first.requested_quantity, 0);

        let latest = repo.latest_requested(&user).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[test_log::test(tokio::test)]
    async fn test_transitions_are_compare_and_set() {
        let (pool, _dir) = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let user = UserId::from("2002");
        Users::new(&mut conn).ensure(&user, "bronze", Utc::now()).await.unwrap();

        let mut repo = Orders::new(&mut conn);
        let order = repo.create(&request(&user), Utc::now()).await.unwrap();

        // Can't fulfill before it is queued
        assert!(repo.mark_fulfilled(order.id, Utc::now()).await.unwrap().is_none());

        let queued = repo.mark_queued(order.id, 3, Utc::now()).await.unwrap().unwrap();
        assert_eq!(queued.status, OrderStatus::Queued);
        assert_eq!(queued.requested_quantity, 3);

        // Second quantity submission loses
        assert!(repo.mark_queued(order.id, 5, Utc::now()).await.unwrap().is_none());
        assert!(repo.cancel_requested(order.id, Utc::now()).await.unwrap().is_none());

        let fulfilled = repo.mark_fulfilled(order.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(fulfilled.status, OrderStatus::Fulfilled);
        assert!(repo.cancel_queued(order.id, Utc::now()).await.unwrap().is_none());
        assert!(repo.latest_requested(&user).await.unwrap().is_none());
    }
}
