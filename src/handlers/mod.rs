use crate::{
    events::EventSender,
    services::{CartService, CheckoutService, OrderService, PaymentProvider},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;

/// Services used by the HTTP handlers, built once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        provider: Arc<dyn PaymentProvider>,
        currency: String,
        intent_ttl_secs: u64,
    ) -> Self {
        Self {
            cart: CartService::new(db.clone(), event_sender.clone()),
            checkout: CheckoutService::new(
                db.clone(),
                provider,
                event_sender.clone(),
                currency,
                intent_ttl_secs,
            ),
            orders: OrderService::new(db, event_sender),
        }
    }
}
