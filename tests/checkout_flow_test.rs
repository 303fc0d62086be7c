mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use greenspace_api::{
    entities::{checkout_intent, order, CheckoutIntent, Order, OrderItem, Payment},
    errors::ServiceError,
    services::checkout::ConfirmOutcome,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

#[tokio::test]
async fn empty_cart_cannot_checkout() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .checkout
        .create_intent(Uuid::new_v4())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn intent_amount_is_cart_total_in_minor_units() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let vendor = Uuid::new_v4();
    let a = app.seed_plant("Monstera", dec!(10.00), vendor, true).await;
    let b = app.seed_plant("Fern", dec!(5.00), vendor, true).await;

    let cart = &app.state.services.cart;
    cart.add_item(buyer_id, a.id, 2).await.expect("add a");
    cart.add_item(buyer_id, b.id, 1).await.expect("add b");

    let intent = app
        .state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .expect("create intent");

    assert_eq!(intent.amount_minor, 2500);
    assert_eq!(intent.currency, "usd");
    assert!(!intent.client_secret.is_empty());

    let stored = CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("query intent")
        .expect("intent stored");
    assert_eq!(stored.buyer_id, buyer_id);
    assert_eq!(stored.amount_minor, 2500);
    assert_eq!(stored.status, checkout_intent::IntentStatus::Pending);
}

#[tokio::test]
async fn out_of_stock_line_blocks_intent_creation() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Cactus", dec!(8.00), Uuid::new_v4(), true).await;

    let cart = &app.state.services.cart;
    cart.add_item(buyer_id, plant.id, 1).await.expect("add");

    // The plant sells out between add and checkout
    let mut active: greenspace_api::entities::plant::ActiveModel =
        greenspace_api::entities::Plant::find_by_id(plant.id)
            .one(&*app.state.db)
            .await
            .expect("find")
            .expect("exists")
            .into();
    active.in_stock = Set(false);
    active.update(&*app.state.db).await.expect("update");

    let err = app
        .state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ItemBecameUnavailable(id) if id == plant.id);
}

#[tokio::test]
async fn gateway_outage_surfaces_and_leaves_cart_intact() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Ivy", dec!(5.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 1)
        .await
        .expect("add");

    app.provider.set_unavailable(true);
    let err = app
        .state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayUnavailable(_));

    let view = app.state.services.cart.get_cart(buyer_id).await.expect("cart");
    assert_eq!(view.lines.len(), 1, "failed checkout must not touch the cart");

    // Gateway recovers; the same cart checks out
    app.provider.set_unavailable(false);
    app.state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .expect("create intent after recovery");
}

#[tokio::test]
async fn confirmation_materializes_orders_per_vendor() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let vendor_a = Uuid::new_v4();
    let vendor_b = Uuid::new_v4();
    let pa = app.seed_plant("Monstera", dec!(10.00), vendor_a, true).await;
    let pb = app.seed_plant("Fern", dec!(5.00), vendor_a, true).await;
    let pc = app.seed_plant("Bonsai", dec!(60.00), vendor_b, true).await;

    let cart = &app.state.services.cart;
    cart.add_item(buyer_id, pa.id, 2).await.expect("add pa");
    cart.add_item(buyer_id, pb.id, 1).await.expect("add pb");
    cart.add_item(buyer_id, pc.id, 1).await.expect("add pc");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    let outcome = checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("confirm");
    let order_ids = match outcome {
        ConfirmOutcome::Completed { order_ids } => order_ids,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(order_ids.len(), 2, "one order per vendor");

    let orders = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .all(&*app.state.db)
        .await
        .expect("orders");
    assert_eq!(orders.len(), 2);

    let total: Decimal = orders.iter().map(|o| o.total_amount).sum();
    assert_eq!(total, dec!(85.00));
    assert_eq!(
        (total * dec!(100)).normalize(),
        Decimal::from(intent.amount_minor),
        "orders must add up to what the buyer was charged"
    );

    for o in &orders {
        assert_eq!(o.status, order::OrderStatus::Pending);

        let items = OrderItem::find()
            .filter(greenspace_api::entities::order_item::Column::OrderId.eq(o.id))
            .all(&*app.state.db)
            .await
            .expect("items");
        let item_sum: Decimal = items
            .iter()
            .map(|i| i.price_per_unit * Decimal::from(i.quantity))
            .sum();
        assert_eq!(item_sum, o.total_amount);

        let payment = Payment::find()
            .filter(greenspace_api::entities::payment::Column::OrderId.eq(o.id))
            .one(&*app.state.db)
            .await
            .expect("payment query")
            .expect("payment recorded");
        assert_eq!(payment.amount, o.total_amount);
        assert_eq!(payment.transaction_id, intent.intent_id);
    }

    // Cart cleared and pending record gone
    let view = cart.get_cart(buyer_id).await.expect("cart");
    assert!(view.lines.is_empty());
    assert!(CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("intent query")
        .is_none());
}

#[tokio::test]
async fn duplicate_confirmation_is_a_noop() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Palm", dec!(30.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 1)
        .await
        .expect("add");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    let first = checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("first confirm");
    assert_matches!(first, ConfirmOutcome::Completed { .. });

    let second = checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("second confirm");
    assert_eq!(second, ConfirmOutcome::AlreadyProcessed);

    let orders = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .all(&*app.state.db)
        .await
        .expect("orders");
    assert_eq!(orders.len(), 1, "replay must not create more orders");
}

#[tokio::test]
async fn orders_use_price_snapshot_from_intent_time() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Orchid", dec!(20.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 2)
        .await
        .expect("add");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    // Price doubles between intent and confirmation
    let mut active: greenspace_api::entities::plant::ActiveModel =
        greenspace_api::entities::Plant::find_by_id(plant.id)
            .one(&*app.state.db)
            .await
            .expect("find")
            .expect("exists")
            .into();
    active.price = Set(dec!(40.00));
    active.update(&*app.state.db).await.expect("reprice");

    checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("confirm");

    let order = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .one(&*app.state.db)
        .await
        .expect("order query")
        .expect("order exists");
    assert_eq!(order.total_amount, dec!(40.00), "2 x 20.00 at intent time");

    let items = OrderItem::find()
        .filter(greenspace_api::entities::order_item::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .expect("items");
    assert_eq!(items[0].price_per_unit, dec!(20.00));
}

#[tokio::test]
async fn paid_checkout_materializes_even_if_item_sold_out() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Aloe", dec!(4.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 1)
        .await
        .expect("add");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    // Sold out after the buyer already paid; the snapshot still applies
    let mut active: greenspace_api::entities::plant::ActiveModel =
        greenspace_api::entities::Plant::find_by_id(plant.id)
            .one(&*app.state.db)
            .await
            .expect("find")
            .expect("exists")
            .into();
    active.in_stock = Set(false);
    active.update(&*app.state.db).await.expect("sell out");

    let outcome = checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("confirm");
    assert_matches!(outcome, ConfirmOutcome::Completed { .. });
}

#[tokio::test]
async fn failed_payment_keeps_cart_and_intent_for_retry() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Basil", dec!(3.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 2)
        .await
        .expect("add");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    let outcome = checkout
        .confirm(&intent.intent_id, false, None, None)
        .await
        .expect("confirm failure");
    assert_eq!(outcome, ConfirmOutcome::PaymentFailed);

    // Nothing materialized, cart untouched, intent flagged failed
    let orders = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .all(&*app.state.db)
        .await
        .expect("orders");
    assert!(orders.is_empty());

    let view = app.state.services.cart.get_cart(buyer_id).await.expect("cart");
    assert_eq!(view.lines.len(), 1);

    let stored = CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("intent query")
        .expect("intent kept");
    assert_eq!(stored.status, checkout_intent::IntentStatus::Failed);

    // The gateway later retries the same intent successfully
    let outcome = checkout
        .confirm(&intent.intent_id, true, None, None)
        .await
        .expect("retried confirm");
    assert_matches!(outcome, ConfirmOutcome::Completed { .. });
}

#[tokio::test]
async fn unknown_intent_confirmation_is_ignored() {
    let app = TestApp::new().await;

    let outcome = app
        .state
        .services
        .checkout
        .confirm("pi_never_issued", true, None, None)
        .await
        .expect("confirm unknown");

    assert_eq!(outcome, ConfirmOutcome::AlreadyProcessed);
}

#[tokio::test]
async fn sweeper_expires_stale_pending_intents() {
    let app = TestApp::new().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Mint", dec!(2.50), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 1)
        .await
        .expect("add");

    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(buyer_id).await.expect("intent");

    // Backdate the expiry so the sweeper sees it as stale
    let stored = CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("query")
        .expect("exists");
    let mut active: checkout_intent::ActiveModel = stored.into();
    active.expires_at = Set(Utc::now() - Duration::hours(1));
    active.update(&*app.state.db).await.expect("backdate");

    let swept = checkout.expire_stale().await.expect("sweep");
    assert_eq!(swept, 1);

    let stored = CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(stored.status, checkout_intent::IntentStatus::Expired);

    // Second sweep finds nothing new
    assert_eq!(checkout.expire_stale().await.expect("sweep again"), 0);
}

#[tokio::test]
async fn concurrent_confirmations_materialize_once() {
    let app = TestApp::new_file_backed().await;
    let buyer_id = Uuid::new_v4();
    let plant = app.seed_plant("Cactus", dec!(12.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(buyer_id, plant.id, 1)
        .await
        .expect("add");
    let intent = app
        .state
        .services
        .checkout
        .create_intent(buyer_id)
        .await
        .expect("intent");

    // Client confirm and webhook racing for the same intent
    let checkout_a = app.state.services.checkout.clone();
    let checkout_b = app.state.services.checkout.clone();
    let id_a = intent.intent_id.clone();
    let id_b = intent.intent_id.clone();
    let a = tokio::spawn(async move { checkout_a.confirm(&id_a, true, None, None).await });
    let b = tokio::spawn(async move { checkout_b.confirm(&id_b, true, None, None).await });

    let a = a.await.expect("join a").expect("confirm a");
    let b = b.await.expect("join b").expect("confirm b");

    let completed = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ConfirmOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1, "exactly one confirmation may claim the intent");
    assert!(
        [&a, &b]
            .iter()
            .any(|o| matches!(o, ConfirmOutcome::AlreadyProcessed)),
        "the losing confirmation must report already-processed"
    );

    let orders = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .all(&*app.state.db)
        .await
        .expect("orders");
    assert_eq!(orders.len(), 1);

    let payments = Payment::find().all(&*app.state.db).await.expect("payments");
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn confirmation_from_another_buyer_is_ignored() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let plant = app.seed_plant("Bonsai", dec!(45.00), Uuid::new_v4(), true).await;

    app.state
        .services
        .cart
        .add_item(owner, plant.id, 1)
        .await
        .expect("add");
    let checkout = &app.state.services.checkout;
    let intent = checkout.create_intent(owner).await.expect("intent");

    let outcome = checkout
        .confirm(&intent.intent_id, true, None, Some(stranger))
        .await
        .expect("foreign confirm");
    assert_eq!(outcome, ConfirmOutcome::AlreadyProcessed);

    // Nothing materialized and the intent is still claimable
    let orders = Order::find().all(&*app.state.db).await.expect("orders");
    assert!(orders.is_empty());
    assert!(CheckoutIntent::find_by_id(intent.intent_id.as_str())
        .one(&*app.state.db)
        .await
        .expect("query")
        .is_some());

    let outcome = checkout
        .confirm(&intent.intent_id, true, None, Some(owner))
        .await
        .expect("owner confirm");
    assert_matches!(outcome, ConfirmOutcome::Completed { .. });
}
