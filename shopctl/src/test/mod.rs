//! End-to-end scenarios across services: concurrent buyers and administrators, and the license
//! lifecycle through the expiry sweeper.

pub mod concurrency;

use crate::commands::{Command, Dispatcher, Outcome};
use crate::db::models::orders::OrderStatus;
use crate::errors::ErrorKind;
use crate::inventory::InventoryAdjustment;
use crate::test_utils::create_test_context;
use crate::types::UserId;

/// Top up, buy, get fulfilled: the balance is charged and the tier follows total spend
#[test_log::test(tokio::test)]
async fn test_e2e_purchase_journey() {
    let ctx = create_test_context().await;
    let admin = ctx.admin();
    let buyer = UserId::from("journey");

    ctx.app
        .inventory
        .adjust_inventory(&admin, InventoryAdjustment::Set, 100)
        .await
        .unwrap();

    let topup_id = ctx.app.topups.request_topup(&buyer, "Lee", 60_000).await.unwrap();
    assert_eq!(ctx.app.topups.list_pending_topups(&admin).await.unwrap().len(), 1);
    ctx.app.topups.resolve_topup(topup_id, true, &admin).await.unwrap();
    assert!(ctx.app.topups.list_pending_topups(&admin).await.unwrap().is_empty());

    let order_id = ctx.app.orders.open_order(&buyer, "gamepass", "lee_builds").await.unwrap();
    let queued = ctx.app.orders.set_order_quantity(&buyer, 50).await.unwrap();
    assert_eq!(queued.id, order_id);
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 50);

    let fulfilled = ctx.app.orders.fulfill_order(order_id, &admin).await.unwrap();
    assert_eq!(fulfilled.status, OrderStatus::Fulfilled);

    let account = ctx.app.accounts.get_user(&buyer).await.unwrap();
    assert_eq!(account.balance, 10_000);
    assert_eq!(account.total_spent, 50_000);
    assert_eq!(account.tier, "silver");

    // A second fulfillment of the same order changes nothing
    let err = ctx.app.orders.fulfill_order(order_id, &admin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
    assert_eq!(ctx.app.accounts.get_user(&buyer).await.unwrap().balance, 10_000);
}

#[test_log::test(tokio::test)]
async fn test_set_negative_stock_clamps_to_zero() {
    let ctx = create_test_context().await;
    let dispatcher = Dispatcher::new().unwrap();

    let outcome = dispatcher
        .dispatch(
            ctx.app.clone(),
            Command::AdjustInventory {
                caller: UserId::from("admin"),
                adjustment: InventoryAdjustment::Set,
                value: -5,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Stock(0));
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_quantity_without_open_order() {
    let ctx = create_test_context().await;
    let dispatcher = Dispatcher::new().unwrap();
    ctx.app.inventory.set_stock(10).await.unwrap();

    let err = dispatcher
        .dispatch(
            ctx.app.clone(),
            Command::SetOrderQuantity {
                user: UserId::from("nobody"),
                quantity: 1,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoActiveOrder);
    assert!(err.is_recoverable());
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 10);
}
