use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pending checkout record: the bridge between a gateway payment intent and
/// the cart snapshot it will materialize into orders. Confirmation deletes
/// the row inside the materialization transaction, so a duplicate
/// confirmation finds nothing and no-ops.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_intents")]
pub struct Model {
    /// Gateway-assigned intent identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub intent_id: String,
    pub buyer_id: Uuid,
    /// Total in minor currency units, as sent to the gateway
    pub amount_minor: i64,
    pub currency: String,
    /// Snapshot of cart lines with prices read at intent creation,
    /// serialized as JSON
    pub lines: Json,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum IntentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "expired")]
    Expired,
}
