use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::stock_movement::{self, Entity as StockMovementEntity, MovementSource, MovementType},
    errors::ServiceError,
};

/// Filters for movement history queries.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub movement_type: Option<MovementType>,
    pub source: Option<MovementSource>,
    pub order_id: Option<Uuid>,
    pub purchase_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Include deactivated (reversed) records as well.
    pub include_inactive: bool,
}

/// Durable storage and retrieval of movement records.
///
/// The ledger is append-only. No update or delete is exposed here; the only
/// permitted mutation is the deactivate flip, and that is reachable solely
/// through the movement service's deactivate-and-compensate path.
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<DatabaseConnection>,
}

impl LedgerStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Movement history for a material, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_material(
        &self,
        material_id: Uuid,
        filter: &MovementFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let mut query = StockMovementEntity::find()
            .filter(stock_movement::Column::MaterialId.eq(material_id));

        if !filter.include_inactive {
            query = query.filter(stock_movement::Column::IsActive.eq(true));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(stock_movement::Column::MovementType.eq(movement_type));
        }
        if let Some(source) = filter.source {
            query = query.filter(stock_movement::Column::Source.eq(source));
        }
        if let Some(order_id) = filter.order_id {
            query = query.filter(stock_movement::Column::OrderId.eq(order_id));
        }
        if let Some(purchase_id) = filter.purchase_id {
            query = query.filter(stock_movement::Column::PurchaseId.eq(purchase_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(stock_movement::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(stock_movement::Column::CreatedAt.lte(to));
        }

        let paginator = query
            .order_by_desc(stock_movement::Column::CreatedAt)
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

    /// The single active movement tied to a purchase, or none.
    #[instrument(skip(self))]
    pub async fn find_by_purchase(
        &self,
        purchase_id: Uuid,
    ) -> Result<Option<stock_movement::Model>, ServiceError> {
        find_active_by_purchase(&*self.db, purchase_id).await
    }
}

/// Active movements for a material in chronological order, as replayed by
/// the stock aggregator.
pub(crate) async fn active_movements<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    StockMovementEntity::find()
        .filter(stock_movement::Column::MaterialId.eq(material_id))
        .filter(stock_movement::Column::IsActive.eq(true))
        .order_by_asc(stock_movement::Column::CreatedAt)
        .order_by_asc(stock_movement::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

pub(crate) async fn find_active_by_purchase<C: ConnectionTrait>(
    conn: &C,
    purchase_id: Uuid,
) -> Result<Option<stock_movement::Model>, ServiceError> {
    StockMovementEntity::find()
        .filter(stock_movement::Column::PurchaseId.eq(purchase_id))
        .filter(stock_movement::Column::IsActive.eq(true))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Whether any movement, active or not, references the purchase. Inactive
/// records still block purchase deletion for audit reasons.
pub(crate) async fn any_for_purchase<C: ConnectionTrait>(
    conn: &C,
    purchase_id: Uuid,
) -> Result<bool, ServiceError> {
    let count = StockMovementEntity::find()
        .filter(stock_movement::Column::PurchaseId.eq(purchase_id))
        .count(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(count > 0)
}

/// Whether any movement, active or not, references the material.
pub(crate) async fn any_for_material<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
) -> Result<bool, ServiceError> {
    let count = StockMovementEntity::find()
        .filter(stock_movement::Column::MaterialId.eq(material_id))
        .count(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(count > 0)
}

/// Persists a new movement record. Business validation belongs to the
/// movement service; the one check enforced here is the consistency-guard
/// rule that a purchase may never gain a second active automated movement.
pub(crate) async fn append<C: ConnectionTrait>(
    conn: &C,
    row: stock_movement::ActiveModel,
) -> Result<stock_movement::Model, ServiceError> {
    if let (Set(MovementSource::Purchase), Set(Some(purchase_id))) = (&row.source, &row.purchase_id)
    {
        if find_active_by_purchase(conn, *purchase_id).await?.is_some() {
            return Err(ServiceError::DuplicateReceipt(*purchase_id));
        }
    }

    row.insert(conn).await.map_err(ServiceError::DatabaseError)
}

/// Flips a movement's active flag off. Callers are responsible for the
/// compensating balance update within the same transaction.
pub(crate) async fn deactivate<C: ConnectionTrait>(
    conn: &C,
    movement: stock_movement::Model,
) -> Result<stock_movement::Model, ServiceError> {
    let mut active: stock_movement::ActiveModel = movement.into();
    active.is_active = Set(false);
    active.update(conn).await.map_err(ServiceError::DatabaseError)
}
