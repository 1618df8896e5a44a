use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of a purchase order.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PurchaseStatus {
    #[sea_orm(string_value = "PENDING")]
    #[strum(serialize = "PENDING")]
    Pending,
    #[sea_orm(string_value = "RECEIVED")]
    #[strum(serialize = "RECEIVED")]
    Received,
    #[sea_orm(string_value = "CANCELLED")]
    #[strum(serialize = "CANCELLED")]
    Cancelled,
}

/// The `purchase_orders` table (purchase log).
///
/// Invariant: a purchase in status `RECEIVED` has exactly one active
/// movement with source `purchase`; a purchase in any other status has
/// none. Status transitions drive the ledger through the movement service.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub material_id: Uuid,

    pub supplier: String,

    /// Ordered quantity in the material's unit.
    pub quantity: Decimal,

    pub unit_price: Decimal,

    /// `quantity * unit_price`, rounded to two decimal places at creation
    /// or update time.
    pub total_cost: Decimal,

    pub status: PurchaseStatus,

    pub delivery_date: Option<NaiveDate>,

    /// Quantity actually delivered, when it differs from the ordered one.
    pub received_quantity: Option<Decimal>,

    pub notes: Option<String>,

    /// Soft-delete marker; only set while no movement references the
    /// purchase.
    pub is_archived: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Quantity a receipt books into the ledger: the delivered quantity if
    /// recorded, otherwise the ordered quantity.
    pub fn receipt_quantity(&self) -> Decimal {
        self.received_quantity.unwrap_or(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialId",
        to = "super::material::Column::Id"
    )]
    Material,
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
}

impl Related<super::material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Material.def()
    }
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
