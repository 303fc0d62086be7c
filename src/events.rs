use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging delivery failure instead of surfacing it.
    /// Event delivery is best-effort and must never fail a request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Events emitted by the cart, checkout, and order services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        buyer_id: Uuid,
        plant_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        buyer_id: Uuid,
        plant_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        buyer_id: Uuid,
        plant_id: Uuid,
    },
    CartCleared(Uuid),

    // Checkout events
    CheckoutIntentCreated {
        buyer_id: Uuid,
        intent_id: String,
        amount_minor: i64,
    },
    CheckoutCompleted {
        intent_id: String,
        order_ids: Vec<Uuid>,
    },
    CheckoutIntentExpired {
        intent_id: String,
    },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentRecorded {
        order_id: Uuid,
        transaction_id: String,
    },
    PaymentFailed {
        intent_id: String,
    },
}

/// Consumes events from the channel and dispatches them. The services only
/// need the log trail today; side effects (notification emails, vendor
/// dashboards) hang off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutCompleted {
                intent_id,
                order_ids,
            } => {
                info!(
                    intent_id = %intent_id,
                    order_count = order_ids.len(),
                    "Checkout completed"
                );
            }
            Event::PaymentFailed { intent_id } => {
                warn!(intent_id = %intent_id, "Payment failed");
            }
            Event::CheckoutIntentExpired { intent_id } => {
                warn!(intent_id = %intent_id, "Checkout intent expired without confirmation");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "Order status changed"
                );
            }
            other => {
                info!("Event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
