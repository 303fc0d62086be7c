use crate::{
    auth::{AuthenticatedUser, UserRole},
    entities::{order, Order, OrderItemModel, OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// An order with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Vendor-supplied fields for a status transition.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: order::OrderStatus,
    pub tracking_number: Option<String>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Read and status-transition surface over materialized orders. Orders
/// are only ever created by checkout; this service never inserts one.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Fetches one order with items. Visible only to the buyer who placed
    /// it and the vendor it was placed with; anyone else gets the same
    /// `NotFound` as a nonexistent id, so order ids leak nothing.
    #[instrument(skip(self, user))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        user: &AuthenticatedUser,
    ) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let visible = match user.role {
            UserRole::Buyer => order.buyer_id == user.id,
            UserRole::Vendor => order.vendor_id == user.id,
        };
        if !visible {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }

        let items = order
            .find_related(crate::entities::OrderItem)
            .all(&*self.db)
            .await?;

        Ok(OrderDetail { order, items })
    }

    /// Lists the caller's orders: a buyer sees orders they placed, a
    /// vendor sees orders placed with them. Newest first.
    #[instrument(skip(self, user))]
    pub async fn list_orders(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let filter = match user.role {
            UserRole::Buyer => order::Column::BuyerId.eq(user.id),
            UserRole::Vendor => order::Column::VendorId.eq(user.id),
        };

        let orders = Order::find()
            .filter(filter)
            .order_by_desc(order::Column::OrderDate)
            .all(&*self.db)
            .await?;

        Ok(orders)
    }

    /// Moves an order along its status lifecycle.
    ///
    /// Only the order's vendor may transition it, and only along the
    /// legal edges of [`order::OrderStatus::can_transition_to`]. Tracking
    /// number, delivery date, and notes are updated when provided.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        vendor_id: Uuid,
        update: StatusUpdate,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.vendor_id != vendor_id {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }

        let old_status = order.status;
        if !old_status.can_transition_to(update.status) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order from {:?} to {:?}",
                old_status, update.status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(update.status);
        if let Some(tracking) = update.tracking_number {
            active.tracking_number = Set(Some(tracking));
        }
        if let Some(delivery) = update.delivery_date {
            active.delivery_date = Set(Some(delivery));
        }
        if let Some(notes) = update.notes {
            active.notes = Set(Some(notes));
        }
        let order = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", old_status).to_lowercase(),
                new_status: format!("{:?}", order.status).to_lowercase(),
            })
            .await;

        info!(
            order_id = %order_id,
            old_status = ?old_status,
            new_status = ?order.status,
            "Order status updated"
        );

        Ok(order)
    }
}
