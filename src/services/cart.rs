use crate::{
    entities::{cart_item, CartItem, CartItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::CatalogService,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Cart line with a fresh catalog snapshot attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub plant_id: Uuid,
    pub name: String,
    pub vendor_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_subtotal: Decimal,
    pub in_stock: bool,
    pub added_at: chrono::DateTime<Utc>,
}

/// The buyer's cart as returned to clients. Prices are read from the
/// catalog at view time; nothing here is a stored total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Decimal,
}

/// Per-buyer cart keyed by (buyer, plant). Quantities merge on repeated
/// adds; prices are never stored on the line, so the cart always reflects
/// the current catalog until checkout snapshots it.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds a plant to the buyer's cart, merging with an existing line.
    ///
    /// The plant must exist and be in stock at add time. Adding the same
    /// plant twice increments the quantity of the single line instead of
    /// creating a second row.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        buyer_id: Uuid,
        plant_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let txn = self.db.begin().await?;

        let plant = CatalogService::get_plant_on(&txn, plant_id).await?;
        if !plant.in_stock {
            return Err(ServiceError::ItemUnavailable(plant_id));
        }

        // Exclusive lock on the line so two adds of the same plant
        // serialize instead of both reading the same quantity
        let existing = CartItem::find()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .filter(cart_item::Column::PlantId.eq(plant_id))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let line = match existing {
            Some(line) => {
                let merged = line.quantity + quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(merged);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    buyer_id: Set(buyer_id),
                    plant_id: Set(plant_id),
                    quantity: Set(quantity),
                    added_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                buyer_id,
                plant_id,
                quantity: line.quantity,
            })
            .await;

        info!(
            buyer_id = %buyer_id,
            plant_id = %plant_id,
            quantity = line.quantity,
            "Cart line upserted"
        );

        Ok(line)
    }

    /// Replaces the quantity of an existing cart line.
    ///
    /// Quantities below one are rejected; removal is a separate, explicit
    /// operation.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        buyer_id: Uuid,
        plant_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let txn = self.db.begin().await?;

        let line = CartItem::find()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .filter(cart_item::Column::PlantId.eq(plant_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(ServiceError::LineNotFound(plant_id))?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let line = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                buyer_id,
                plant_id,
                quantity,
            })
            .await;

        Ok(line)
    }

    /// Removes a cart line. Removing a plant that is not in the cart is
    /// not an error; returns whether a line was actually deleted.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, buyer_id: Uuid, plant_id: Uuid) -> Result<bool, ServiceError> {
        let line = CartItem::find()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .filter(cart_item::Column::PlantId.eq(plant_id))
            .one(&*self.db)
            .await?;

        let Some(line) = line else {
            return Ok(false);
        };

        line.delete(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved { buyer_id, plant_id })
            .await;

        Ok(true)
    }

    /// Empties the buyer's cart. Already used by checkout inside its own
    /// transaction via `clear_on`; this is the client-facing variant.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, buyer_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .exec(&*self.db)
            .await?;

        self.event_sender.send_or_log(Event::CartCleared(buyer_id)).await;

        Ok(result.rows_affected)
    }

    /// Returns the buyer's cart with fresh catalog reads.
    ///
    /// Each line carries the plant's current price and availability;
    /// the total is the sum of quantity times current unit price. A line
    /// whose plant went out of stock is still listed, flagged by
    /// `in_stock`, so the client can surface it before checkout fails.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, buyer_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = CartItem::find()
            .filter(cart_item::Column::BuyerId.eq(buyer_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .find_also_related(crate::entities::Plant)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        let mut total = Decimal::ZERO;

        for (item, plant) in rows {
            // FK with cascade keeps lines from outliving their plant
            let Some(plant) = plant else { continue };

            let line_subtotal = plant.price * Decimal::from(item.quantity);
            total += line_subtotal;

            lines.push(CartLine {
                plant_id: item.plant_id,
                name: plant.name,
                vendor_id: plant.vendor_id,
                quantity: item.quantity,
                unit_price: plant.price,
                line_subtotal,
                in_stock: plant.in_stock,
                added_at: item.added_at,
            });
        }

        Ok(CartView { lines, total })
    }
}
