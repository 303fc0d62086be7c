use crate::{
    entities::{
        cart_item, checkout_intent, order, order_item, payment, CartItem, CheckoutIntent,
        CheckoutIntentModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payment_gateway::PaymentProvider,
};
use chrono::{Duration, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One cart line frozen at intent creation. Everything the
/// materialization step needs is here, so later catalog edits cannot
/// change what the buyer pays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLine {
    pub plant_id: Uuid,
    pub vendor_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// What the client needs to complete payment against the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutIntentResponse {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
}

/// Result of a confirmation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Orders were created; the cart is now empty.
    Completed { order_ids: Vec<Uuid> },
    /// No pending record exists for this intent. Either it was already
    /// materialized or it was never ours; both are safe to ignore.
    AlreadyProcessed,
    /// The gateway reported payment failure; nothing was materialized.
    PaymentFailed,
}

/// Orchestrates the cart-to-order boundary: snapshotting the cart into a
/// gateway payment intent, then materializing orders exactly once when
/// the payment is confirmed.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    event_sender: Arc<EventSender>,
    currency: String,
    intent_ttl: Duration,
}

/// Converts a decimal amount to minor currency units, rounding half away
/// from zero at two decimal places.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| ServiceError::CheckoutFailed(format!("amount {} out of range", amount)))
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        event_sender: Arc<EventSender>,
        currency: String,
        intent_ttl_secs: u64,
    ) -> Self {
        Self {
            db,
            provider,
            event_sender,
            currency,
            intent_ttl: Duration::seconds(intent_ttl_secs as i64),
        }
    }

    /// Creates a payment intent for the buyer's current cart.
    ///
    /// Revalidates every line against the catalog with fresh reads: the
    /// cart must be non-empty and every plant still in stock. Prices are
    /// snapshotted into the intent at this moment; the snapshot, not the
    /// live catalog, is what materialization uses later.
    #[instrument(skip(self))]
    pub async fn create_intent(
        &self,
        buyer_id: Uuid,
    ) -> Result<CheckoutIntentResponse, ServiceError> {
        let rows = CartItem::find()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .find_also_related(crate::entities::Plant)
            .all(&*self.db)
            .await?;

        if rows.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(rows.len());
        let mut total = Decimal::ZERO;

        for (item, plant) in rows {
            let plant = plant.ok_or(ServiceError::ItemBecameUnavailable(item.plant_id))?;
            if !plant.in_stock {
                return Err(ServiceError::ItemBecameUnavailable(plant.id));
            }

            total += plant.price * Decimal::from(item.quantity);
            lines.push(IntentLine {
                plant_id: plant.id,
                vendor_id: plant.vendor_id,
                quantity: item.quantity,
                unit_price: plant.price,
            });
        }

        let amount_minor = to_minor_units(total)?;

        let gateway_intent = self
            .provider
            .create_intent(amount_minor, &self.currency)
            .await?;

        let now = Utc::now();
        checkout_intent::ActiveModel {
            intent_id: Set(gateway_intent.id.clone()),
            buyer_id: Set(buyer_id),
            amount_minor: Set(amount_minor),
            currency: Set(self.currency.clone()),
            lines: Set(serde_json::to_value(&lines)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            status: Set(checkout_intent::IntentStatus::Pending),
            created_at: Set(now),
            expires_at: Set(now + self.intent_ttl),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::CheckoutIntentCreated {
                buyer_id,
                intent_id: gateway_intent.id.clone(),
                amount_minor,
            })
            .await;

        info!(
            buyer_id = %buyer_id,
            intent_id = %gateway_intent.id,
            amount_minor,
            "Checkout intent created"
        );

        Ok(CheckoutIntentResponse {
            intent_id: gateway_intent.id,
            client_secret: gateway_intent.client_secret,
            amount: total,
            amount_minor,
            currency: self.currency.clone(),
        })
    }

    /// Applies a payment result to a pending intent.
    ///
    /// On success, materializes the snapshot into one order per vendor,
    /// records a payment per order, clears the buyer's cart, and deletes
    /// the pending record, all in one transaction. The delete is
    /// conditional: confirmations arriving after (or racing with) the
    /// one that claims the record return `AlreadyProcessed` without
    /// touching anything.
    ///
    /// A transient storage failure is retried once before surfacing as
    /// `CheckoutFailed`; the transaction guarantees no partial state
    /// either way.
    #[instrument(skip(self))]
    pub async fn confirm(
        &self,
        intent_id: &str,
        succeeded: bool,
        method: Option<payment::PaymentMethod>,
        claimant: Option<Uuid>,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let Some(intent) = CheckoutIntent::find_by_id(intent_id).one(&*self.db).await? else {
            info!(intent_id, "No pending record for intent; nothing to do");
            return Ok(ConfirmOutcome::AlreadyProcessed);
        };

        // Client confirmations carry the caller; the intent must be
        // theirs. A foreign intent id answers exactly like an unknown
        // one. Webhook confirmations have no principal.
        if let Some(claimant) = claimant {
            if claimant != intent.buyer_id {
                warn!(intent_id, %claimant, "Confirmation from a different buyer ignored");
                return Ok(ConfirmOutcome::AlreadyProcessed);
            }
        }

        if !succeeded {
            let mut active: checkout_intent::ActiveModel = intent.into();
            active.status = Set(checkout_intent::IntentStatus::Failed);
            active.update(&*self.db).await?;

            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    intent_id: intent_id.to_string(),
                })
                .await;

            warn!(intent_id, "Payment failed; intent kept for retry");
            return Ok(ConfirmOutcome::PaymentFailed);
        }

        let lines: Vec<IntentLine> = serde_json::from_value(intent.lines.clone())
            .map_err(|e| ServiceError::InternalError(format!("corrupt intent snapshot: {}", e)))?;
        let method = method.unwrap_or(payment::PaymentMethod::CreditCard);

        let mut last_err = None;
        for attempt in 0..2 {
            match self.materialize(&intent, &lines, method).await {
                Ok(None) => {
                    info!(intent_id, "Intent claimed by a concurrent confirmation");
                    return Ok(ConfirmOutcome::AlreadyProcessed);
                }
                Ok(Some(order_ids)) => {
                    for order_id in &order_ids {
                        self.event_sender
                            .send_or_log(Event::OrderCreated(*order_id))
                            .await;
                        self.event_sender
                            .send_or_log(Event::PaymentRecorded {
                                order_id: *order_id,
                                transaction_id: intent_id.to_string(),
                            })
                            .await;
                    }
                    self.event_sender
                        .send_or_log(Event::CheckoutCompleted {
                            intent_id: intent_id.to_string(),
                            order_ids: order_ids.clone(),
                        })
                        .await;

                    info!(
                        intent_id,
                        order_count = order_ids.len(),
                        "Checkout materialized"
                    );
                    return Ok(ConfirmOutcome::Completed { order_ids });
                }
                Err(e) => {
                    warn!(intent_id, attempt, error = %e, "Materialization attempt failed");
                    last_err = Some(e);
                }
            }
        }

        error!(intent_id, "Materialization failed after retry");
        Err(ServiceError::CheckoutFailed(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }

    /// One transaction: pending record claimed by deletion, orders split
    /// by vendor, items from the snapshot, a payment per order, cart
    /// cleared. Returns `None` when another confirmation claimed the
    /// intent first.
    async fn materialize(
        &self,
        intent: &CheckoutIntentModel,
        lines: &[IntentLine],
        method: payment::PaymentMethod,
    ) -> Result<Option<Vec<Uuid>>, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        // The delete is the claim on the intent. Concurrent
        // confirmations serialize on this row; whichever deletes it
        // materializes, the rest see zero rows and back off.
        let claimed = CheckoutIntent::delete_by_id(intent.intent_id.clone())
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        // BTreeMap keeps vendor order deterministic across retries
        let mut by_vendor: BTreeMap<Uuid, Vec<&IntentLine>> = BTreeMap::new();
        for line in lines {
            by_vendor.entry(line.vendor_id).or_default().push(line);
        }

        let mut order_ids = Vec::with_capacity(by_vendor.len());

        for (vendor_id, vendor_lines) in &by_vendor {
            let vendor_total: Decimal = vendor_lines
                .iter()
                .map(|l| l.unit_price * Decimal::from(l.quantity))
                .sum();

            let order_id = Uuid::new_v4();
            order::ActiveModel {
                id: Set(order_id),
                buyer_id: Set(intent.buyer_id),
                vendor_id: Set(*vendor_id),
                status: Set(order::OrderStatus::Pending),
                total_amount: Set(vendor_total),
                order_date: Set(now),
                delivery_date: Set(None),
                tracking_number: Set(None),
                notes: Set(None),
            }
            .insert(&txn)
            .await?;

            for line in vendor_lines {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    plant_id: Set(line.plant_id),
                    quantity: Set(line.quantity),
                    price_per_unit: Set(line.unit_price),
                }
                .insert(&txn)
                .await?;
            }

            payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                payment_method: Set(method),
                amount: Set(vendor_total),
                payment_status: Set("completed".to_string()),
                transaction_id: Set(intent.intent_id.clone()),
                payment_date: Set(now),
            }
            .insert(&txn)
            .await?;

            order_ids.push(order_id);
        }

        CartItem::delete_many()
            .filter(cart_item::Column::BuyerId.eq(intent.buyer_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        Ok(Some(order_ids))
    }

    /// Marks pending intents past their expiry as expired. Run
    /// periodically by the background sweeper; returns how many intents
    /// were swept.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();

        let stale = CheckoutIntent::find()
            .filter(checkout_intent::Column::Status.eq(checkout_intent::IntentStatus::Pending))
            .filter(checkout_intent::Column::ExpiresAt.lt(now))
            .all(&*self.db)
            .await?;

        let mut swept = 0u64;
        for intent in stale {
            let intent_id = intent.intent_id.clone();
            let mut active: checkout_intent::ActiveModel = intent.into();
            active.status = Set(checkout_intent::IntentStatus::Expired);
            active.update(&*self.db).await?;

            self.event_sender
                .send_or_log(Event::CheckoutIntentExpired {
                    intent_id: intent_id.clone(),
                })
                .await;
            swept += 1;
        }

        if swept > 0 {
            info!(swept, "Expired stale checkout intents");
        }

        Ok(swept)
    }
}
