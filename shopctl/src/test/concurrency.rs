use crate::db::models::licenses::LicenseKind;
use crate::db::models::orders::OrderStatus;
use crate::errors::ErrorKind;
use crate::test_utils::create_test_context;
use crate::types::UserId;

#[test_log::test(tokio::test)]
async fn test_two_buyers_race_for_last_units() {
    let ctx = create_test_context().await;
    ctx.app.inventory.set_stock(10).await.unwrap();

    let (a, b) = tokio::join!(ctx.app.inventory.reserve(6), ctx.app.inventory.reserve(6));

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert_eq!(failure.kind(), ErrorKind::InsufficientStock);
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 4);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_reservations_never_oversell() {
    let ctx = create_test_context().await;
    let start = 50;
    ctx.app.inventory.set_stock(start).await.unwrap();

    let amounts: Vec<i64> = (0..24).map(|i| (i % 7) + 1).collect();
    let handles: Vec<_> = amounts
        .iter()
        .map(|&amount| {
            let inventory = ctx.app.inventory.clone();
            tokio::spawn(async move { (amount, inventory.reserve(amount).await) })
        })
        .collect();

    let mut reserved = 0;
    for handle in handles {
        let (amount, result) = handle.await.unwrap();
        match result {
            Ok(remaining) => {
                assert!(remaining >= 0);
                reserved += amount;
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientStock),
        }
    }

    assert!(reserved <= start);
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), start - reserved);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_orders_only_queue_what_is_in_stock() {
    let ctx = create_test_context().await;
    ctx.app.inventory.set_stock(10).await.unwrap();

    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    ctx.app.orders.open_order(&alice, "gamepass", "alice").await.unwrap();
    ctx.app.orders.open_order(&bob, "gamepass", "bob").await.unwrap();

    let (a, b) = tokio::join!(
        ctx.app.orders.set_order_quantity(&alice, 6),
        ctx.app.orders.set_order_quantity(&bob, 6)
    );
    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 4);

    // The loser's order is still open and can be retried with less
    let loser = if a.is_err() { &alice } else { &bob };
    let orders = ctx.app.orders.list_orders(loser).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::Requested);

    let retried = ctx.app.orders.set_order_quantity(loser, 4).await.unwrap();
    assert_eq!(retried.status, OrderStatus::Queued);
    assert_eq!(ctx.app.inventory.stock().await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_double_approve_credits_once() {
    let ctx = create_test_context().await;
    let admin = ctx.admin();
    let user = UserId::from("double-approve");

    let topup_id = ctx.app.topups.request_topup(&user, "Park", 5_000).await.unwrap();

    let (first, second) = tokio::join!(
        ctx.app.topups.resolve_topup(topup_id, true, &admin),
        ctx.app.topups.resolve_topup(topup_id, true, &admin)
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::AlreadyResolved)
    );

    assert_eq!(ctx.app.accounts.get_user(&user).await.unwrap().balance, 5_000);
}

#[test_log::test(tokio::test)]
async fn test_code_redeemed_once_under_contention() {
    let ctx = create_test_context().await;
    let code = ctx.app.licenses.issue_code(&ctx.admin(), LicenseKind::Long).await.unwrap();

    let first_user = UserId::from("racer-1");
    let second_user = UserId::from("racer-2");
    let (a, b) = tokio::join!(
        ctx.app.licenses.redeem(&first_user, &code.code),
        ctx.app.licenses.redeem(&second_user, &code.code)
    );

    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    let loser_error = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert_eq!(loser_error.kind(), ErrorKind::CodeAlreadyUsed);

    let active = [
        ctx.app.licenses.has_active_license(&first_user).await.unwrap(),
        ctx.app.licenses.has_active_license(&second_user).await.unwrap(),
    ];
    assert_eq!(active.iter().filter(|a| **a).count(), 1);
}
