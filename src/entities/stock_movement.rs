use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signed direction of a stock movement.
///
/// `Adjust` is an absolute correction: its quantity is the new stock level,
/// not a delta.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum MovementType {
    #[sea_orm(string_value = "IN")]
    #[strum(serialize = "IN")]
    In,
    #[sea_orm(string_value = "OUT")]
    #[strum(serialize = "OUT")]
    Out,
    #[sea_orm(string_value = "ADJUST")]
    #[strum(serialize = "ADJUST")]
    Adjust,
}

/// Origin of a movement; governs its mutability rules.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum MovementSource {
    /// Recorded by hand through the stock UI.
    #[sea_orm(string_value = "manual")]
    #[strum(serialize = "manual")]
    Manual,
    /// Derived automatically from a purchase-order receipt.
    #[sea_orm(string_value = "purchase")]
    #[strum(serialize = "purchase")]
    Purchase,
    /// Consumption against a workshop order.
    #[sea_orm(string_value = "order")]
    #[strum(serialize = "order")]
    Order,
    /// Absolute stock correction.
    #[sea_orm(string_value = "adjustment")]
    #[strum(serialize = "adjustment")]
    Adjustment,
}

/// The `stock_movements` table: one row per atomic stock-affecting event.
///
/// Rows are append-only. The only permitted mutation is flipping
/// `is_active` to false through the movement service's
/// deactivate-and-compensate path; `quantity`, `movement_type` and
/// `qty_after` are fixed at creation time.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub material_id: Uuid,

    /// Workshop order this movement was consumed against, if any.
    pub order_id: Option<Uuid>,

    /// Purchase order that produced this movement, if automated.
    pub purchase_id: Option<Uuid>,

    /// User who initiated the movement, when known.
    pub created_by: Option<Uuid>,

    pub movement_type: MovementType,
    pub source: MovementSource,

    /// Non-negative quantity in `unit`. For `ADJUST` this is the new
    /// absolute stock level.
    pub quantity: Decimal,

    /// Unit of measure, copied from the material at recording time.
    pub unit: String,

    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,

    /// Stock balance immediately after this movement. A point-in-time
    /// snapshot, never recomputed.
    pub qty_after: Decimal,

    pub notes: Option<String>,

    /// Soft-delete / reversal marker. Inactive movements stay on record for
    /// audit but no longer contribute to the replayed balance.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialId",
        to = "super::material::Column::Id"
    )]
    Material,
    #[sea_orm(
        belongs_to = "super::purchase_order::Entity",
        from = "Column::PurchaseId",
        to = "super::purchase_order::Column::Id"
    )]
    PurchaseOrder,
}

impl Related<super::material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Material.def()
    }
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
