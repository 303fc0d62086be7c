use crate::{
    entities::{plant, Plant, PlantModel},
    errors::ServiceError,
};
use sea_orm::{ConnectionTrait, EntityTrait};
use std::sync::Arc;
use uuid::Uuid;

/// Read-only view of the plant catalog. Listings are written elsewhere;
/// the cart and checkout services only need price, availability, and the
/// owning vendor, always read fresh from storage.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<sea_orm::DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<sea_orm::DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a plant by id.
    pub async fn get_plant(&self, plant_id: Uuid) -> Result<PlantModel, ServiceError> {
        Plant::find_by_id(plant_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ItemNotFound(plant_id))
    }

    /// Looks up a plant on an existing connection or transaction.
    pub async fn get_plant_on<C: ConnectionTrait>(
        conn: &C,
        plant_id: Uuid,
    ) -> Result<PlantModel, ServiceError> {
        plant::Entity::find_by_id(plant_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::ItemNotFound(plant_id))
    }
}
