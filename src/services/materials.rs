use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionError, TransactionTrait,
    sea_query::Expr,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        material::{self, Entity as MaterialEntity},
        purchase_order::{self, Entity as PurchaseOrderEntity},
    },
    errors::ServiceError,
    services::ledger,
};

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub name: String,
    pub unit: String,
    pub safety_stock: Decimal,
    pub notes: Option<String>,
}

/// Field updates for a material. The cached stock is deliberately absent:
/// only the movement service writes it.
#[derive(Debug, Clone, Default)]
pub struct MaterialUpdate {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub safety_stock: Option<Decimal>,
    pub notes: Option<String>,
}

/// Material registry: the boundary the material-management UI talks to.
#[derive(Clone)]
pub struct MaterialService {
    db: Arc<DatabaseConnection>,
}

impl MaterialService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a material with zero stock. Opening balances are booked as
    /// movements, never written directly.
    #[instrument(skip(self, new))]
    pub async fn create_material(
        &self,
        new: NewMaterial,
    ) -> Result<material::Model, ServiceError> {
        validate_new_material(&new)?;

        let now = Utc::now();
        let row = material::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name.trim().to_string()),
            unit: Set(new.unit.trim().to_string()),
            qty_on_hand: Set(Decimal::ZERO),
            safety_stock: Set(new.safety_stock),
            notes: Set(new.notes),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = row
            .insert(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(material_id = %created.id, name = %created.name, "Material created");

        Ok(created)
    }

    /// Gets a material by ID.
    #[instrument(skip(self))]
    pub async fn get_material(
        &self,
        material_id: Uuid,
    ) -> Result<Option<material::Model>, ServiceError> {
        MaterialEntity::find_by_id(material_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists materials alphabetically, optionally filtered by a name
    /// fragment.
    #[instrument(skip(self))]
    pub async fn list_materials(
        &self,
        search: Option<&str>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<material::Model>, u64), ServiceError> {
        let mut query = MaterialEntity::find();

        if let Some(fragment) = search.filter(|s| !s.trim().is_empty()) {
            query = query.filter(material::Column::Name.contains(fragment.trim()));
        }

        let paginator = query
            .order_by_asc(material::Column::Name)
            .paginate(&*self.db, limit.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let items = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((items, total))
    }

    /// Materials at or below their safety-stock threshold.
    #[instrument(skip(self))]
    pub async fn low_stock(&self) -> Result<Vec<material::Model>, ServiceError> {
        MaterialEntity::find()
            .filter(
                Expr::col((material::Entity, material::Column::QtyOnHand))
                    .lte(Expr::col((material::Entity, material::Column::SafetyStock))),
            )
            .order_by_asc(material::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Updates material metadata.
    #[instrument(skip(self, update))]
    pub async fn update_material(
        &self,
        material_id: Uuid,
        update: MaterialUpdate,
    ) -> Result<material::Model, ServiceError> {
        validate_update(&update)?;

        let material = MaterialEntity::find_by_id(material_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Material {} not found", material_id)))?;

        let mut active: material::ActiveModel = material.into();
        if let Some(name) = update.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(unit) = update.unit {
            active.unit = Set(unit.trim().to_string());
        }
        if let Some(safety_stock) = update.safety_stock {
            active.safety_stock = Set(safety_stock);
        }
        if let Some(notes) = update.notes {
            active.notes = Set(Some(notes));
        }
        active.updated_at = Set(Utc::now());

        active
            .update(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Deletes a material. Refused while any movement or purchase order
    /// references it, so ledger history is never orphaned.
    #[instrument(skip(self))]
    pub async fn delete_material(&self, material_id: Uuid) -> Result<(), ServiceError> {
        self.db
            .transaction::<_, (), ServiceError>(move |txn| {
                Box::pin(async move {
                    let material = MaterialEntity::find_by_id(material_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Material {} not found", material_id))
                        })?;

                    if ledger::any_for_material(txn, material_id).await? {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Material {} has movement history and cannot be deleted",
                            material_id
                        )));
                    }

                    let purchases = PurchaseOrderEntity::find()
                        .filter(purchase_order::Column::MaterialId.eq(material_id))
                        .count(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;
                    if purchases > 0 {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Material {} is referenced by purchase orders and cannot be deleted",
                            material_id
                        )));
                    }

                    material
                        .delete(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;
                    Ok(())
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(material_id = %material_id, "Material deleted");

        Ok(())
    }
}

fn validate_new_material(new: &NewMaterial) -> Result<(), ServiceError> {
    if new.name.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Material name must not be empty".to_string(),
        ));
    }
    if new.unit.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Unit of measure must not be empty".to_string(),
        ));
    }
    if new.safety_stock < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Safety stock cannot be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_update(update: &MaterialUpdate) -> Result<(), ServiceError> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Material name must not be empty".to_string(),
            ));
        }
    }
    if let Some(unit) = &update.unit {
        if unit.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Unit of measure must not be empty".to_string(),
            ));
        }
    }
    if let Some(safety_stock) = update.safety_stock {
        if safety_stock < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Safety stock cannot be negative".to_string(),
            ));
        }
    }
    Ok(())
}
