use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        material::Entity as MaterialEntity,
        purchase_order::{self, Entity as PurchaseOrderEntity, PurchaseStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        ledger,
        movements::{self, MovementOutcome, ReceiptOutcome, ReversalOutcome},
    },
};

/// Ledger side effect of a purchase status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptEffect {
    None,
    Apply,
    Reverse,
}

/// Decides the ledger effect of a status transition: entering `RECEIVED`
/// books a receipt, leaving `RECEIVED` reverses it, everything else leaves
/// the ledger alone.
pub fn receipt_effect(from: PurchaseStatus, to: PurchaseStatus) -> ReceiptEffect {
    let received = PurchaseStatus::Received;
    match (from == received, to == received) {
        (false, true) => ReceiptEffect::Apply,
        (true, false) => ReceiptEffect::Reverse,
        _ => ReceiptEffect::None,
    }
}

/// Request payload for creating a purchase order.
#[derive(Debug, Clone)]
pub struct NewPurchaseOrder {
    pub material_id: Uuid,
    pub supplier: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Initial status. Creating directly as `RECEIVED` books the receipt
    /// movement as part of the same transaction.
    pub status: PurchaseStatus,
    pub delivery_date: Option<NaiveDate>,
    pub received_quantity: Option<Decimal>,
    pub notes: Option<String>,
}

/// Field updates for an existing purchase order. `None` leaves a field
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct PurchaseUpdate {
    pub supplier: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub delivery_date: Option<NaiveDate>,
    pub received_quantity: Option<Decimal>,
    pub notes: Option<String>,
}

/// Committed result of a status update.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub purchase: purchase_order::Model,
    pub old_status: PurchaseStatus,
    pub receipt: Option<ReceiptOutcome>,
    pub reversal: Option<ReversalOutcome>,
}

/// Committed result of a field update.
#[derive(Debug, Clone)]
pub struct PurchaseEdit {
    pub purchase: purchase_order::Model,
    /// Present when the edit re-issued the receipt movement.
    pub reissue: Option<movements::ReissueOutcome>,
}

/// Filters for purchase-order listings.
#[derive(Debug, Clone, Default)]
pub struct PurchaseFilter {
    pub material_id: Option<Uuid>,
    pub status: Option<PurchaseStatus>,
}

/// Purchase-order lifecycle around the receipt state machine.
///
/// Status transitions are explicit service calls, not persistence hooks:
/// the transition function decides the ledger effect, the movement service
/// executes it, and the status write commits in the same transaction. A
/// rejected reversal therefore leaves the purchase `RECEIVED`.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl PurchaseOrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a purchase order; a `RECEIVED` initial status fires the
    /// receipt effect on creation.
    #[instrument(skip(self, new))]
    pub async fn create_purchase(
        &self,
        new: NewPurchaseOrder,
    ) -> Result<(purchase_order::Model, Option<ReceiptOutcome>), ServiceError> {
        validate_new_purchase(&new)?;

        let (purchase, receipt) = self
            .db
            .transaction::<_, (purchase_order::Model, Option<ReceiptOutcome>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        MaterialEntity::find_by_id(new.material_id)
                            .one(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Material {} not found",
                                    new.material_id
                                ))
                            })?;

                        let now = Utc::now();
                        let row = purchase_order::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            material_id: Set(new.material_id),
                            supplier: Set(new.supplier.clone()),
                            quantity: Set(new.quantity),
                            unit_price: Set(new.unit_price),
                            total_cost: Set((new.quantity * new.unit_price).round_dp(2)),
                            status: Set(new.status),
                            delivery_date: Set(new.delivery_date),
                            received_quantity: Set(new.received_quantity),
                            notes: Set(new.notes.clone()),
                            is_archived: Set(false),
                            created_at: Set(now),
                            updated_at: Set(now),
                        };

                        let created =
                            row.insert(txn).await.map_err(ServiceError::DatabaseError)?;

                        let receipt = if created.status == PurchaseStatus::Received {
                            Some(movements::apply_receipt_in(txn, &created).await?)
                        } else {
                            None
                        };

                        Ok((created, receipt))
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            purchase_id = %purchase.id,
            material_id = %purchase.material_id,
            status = %purchase.status,
            "Purchase order created"
        );

        if let Some(ReceiptOutcome::Applied(applied)) = &receipt {
            self.emit_receipt_applied(&purchase, applied).await;
        }

        Ok((purchase, receipt))
    }

    /// Applies a status transition and its ledger effect atomically.
    ///
    /// Entering `RECEIVED` is idempotent for retried requests; leaving
    /// `RECEIVED` fails (and the status stays put) when the received
    /// material has already been consumed.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        purchase_id: Uuid,
        new_status: PurchaseStatus,
    ) -> Result<StatusChange, ServiceError> {
        let change = self
            .db
            .transaction::<_, StatusChange, ServiceError>(move |txn| {
                Box::pin(async move {
                    let purchase = lock_purchase(txn, purchase_id).await?;
                    let old_status = purchase.status;

                    if old_status == new_status {
                        return Ok(StatusChange {
                            purchase,
                            old_status,
                            receipt: None,
                            reversal: None,
                        });
                    }

                    let mut receipt = None;
                    let mut reversal = None;
                    match receipt_effect(old_status, new_status) {
                        ReceiptEffect::Apply => {
                            receipt = Some(movements::apply_receipt_in(txn, &purchase).await?);
                        }
                        ReceiptEffect::Reverse => {
                            reversal = Some(movements::reverse_receipt_in(txn, &purchase).await?);
                        }
                        ReceiptEffect::None => {}
                    }

                    let mut active: purchase_order::ActiveModel = purchase.into();
                    active.status = Set(new_status);
                    active.updated_at = Set(Utc::now());
                    let updated = active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    Ok(StatusChange {
                        purchase: updated,
                        old_status,
                        receipt,
                        reversal,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        if change.old_status != change.purchase.status {
            info!(
                purchase_id = %change.purchase.id,
                old_status = %change.old_status,
                new_status = %change.purchase.status,
                "Purchase status changed"
            );

            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::PurchaseStatusChanged {
                        purchase_id: change.purchase.id,
                        old_status: change.old_status.to_string(),
                        new_status: change.purchase.status.to_string(),
                    })
                    .await;
            }

            if let Some(ReceiptOutcome::Applied(applied)) = &change.receipt {
                self.emit_receipt_applied(&change.purchase, applied).await;
            }
            if let Some(ReversalOutcome::Reversed(reversed)) = &change.reversal {
                self.emit_receipt_reversed(&change.purchase, reversed).await;
            }
        }

        Ok(change)
    }

    /// Edits purchase fields. When the purchase is `RECEIVED` and the
    /// effective receipt quantity or price changes, the existing movement
    /// is reversed and re-issued in the same transaction; the movement
    /// itself is never edited in place.
    #[instrument(skip(self, update))]
    pub async fn update_purchase(
        &self,
        purchase_id: Uuid,
        update: PurchaseUpdate,
    ) -> Result<PurchaseEdit, ServiceError> {
        validate_update(&update)?;

        let edit = self
            .db
            .transaction::<_, PurchaseEdit, ServiceError>(move |txn| {
                Box::pin(async move {
                    let purchase = lock_purchase(txn, purchase_id).await?;

                    let old_receipt_quantity = purchase.receipt_quantity();
                    let old_unit_price = purchase.unit_price;

                    let quantity = update.quantity.unwrap_or(purchase.quantity);
                    let unit_price = update.unit_price.unwrap_or(purchase.unit_price);
                    let received_quantity =
                        update.received_quantity.or(purchase.received_quantity);

                    let mut active: purchase_order::ActiveModel = purchase.clone().into();
                    if let Some(supplier) = update.supplier.clone() {
                        active.supplier = Set(supplier);
                    }
                    if let Some(delivery_date) = update.delivery_date {
                        active.delivery_date = Set(Some(delivery_date));
                    }
                    if let Some(notes) = update.notes.clone() {
                        active.notes = Set(Some(notes));
                    }
                    active.quantity = Set(quantity);
                    active.unit_price = Set(unit_price);
                    active.received_quantity = Set(received_quantity);
                    active.total_cost = Set((quantity * unit_price).round_dp(2));
                    active.updated_at = Set(Utc::now());

                    let updated = active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let receipt_changed = updated.receipt_quantity() != old_receipt_quantity
                        || updated.unit_price != old_unit_price;

                    let reissue = if updated.status == PurchaseStatus::Received && receipt_changed
                    {
                        Some(movements::reissue_receipt_in(txn, &updated).await?)
                    } else {
                        None
                    };

                    Ok(PurchaseEdit {
                        purchase: updated,
                        reissue,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(purchase_id = %edit.purchase.id, "Purchase order updated");

        if let Some(reissue) = &edit.reissue {
            if let (Some(sender), Some(retired)) = (&self.event_sender, &reissue.retired) {
                sender
                    .send_or_log(Event::PurchaseReceiptReversed {
                        purchase_id: edit.purchase.id,
                        material_id: retired.material_id,
                        movement_id: retired.id,
                        quantity: retired.quantity,
                    })
                    .await;
            }
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::PurchaseReceiptApplied {
                        purchase_id: edit.purchase.id,
                        material_id: reissue.movement.material_id,
                        movement_id: reissue.movement.id,
                        quantity: reissue.movement.quantity,
                    })
                    .await;
            }
        }

        Ok(edit)
    }

    /// Soft-deletes a purchase order. Refused while any movement record,
    /// active or not, references it; those purchases are cancelled
    /// instead so the audit trail stays intact.
    #[instrument(skip(self))]
    pub async fn delete_purchase(
        &self,
        purchase_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let purchase = self
            .db
            .transaction::<_, purchase_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let purchase = lock_purchase(txn, purchase_id).await?;

                    if ledger::any_for_purchase(txn, purchase_id).await? {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Purchase {} has ledger history and cannot be deleted; cancel it instead",
                            purchase_id
                        )));
                    }

                    let mut active: purchase_order::ActiveModel = purchase.into();
                    active.is_archived = Set(true);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::DatabaseError)
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(purchase_id = %purchase.id, "Purchase order archived");

        Ok(purchase)
    }

    /// Gets a purchase order by ID.
    #[instrument(skip(self))]
    pub async fn get_purchase(
        &self,
        purchase_id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        PurchaseOrderEntity::find_by_id(purchase_id)
            .filter(purchase_order::Column::IsArchived.eq(false))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists purchase orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_purchases(
        &self,
        filter: &PurchaseFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<purchase_order::Model>, u64), ServiceError> {
        let mut query = PurchaseOrderEntity::find()
            .filter(purchase_order::Column::IsArchived.eq(false));

        if let Some(material_id) = filter.material_id {
            query = query.filter(purchase_order::Column::MaterialId.eq(material_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(purchase_order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(purchase_order::Column::CreatedAt)
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

    async fn emit_receipt_applied(
        &self,
        purchase: &purchase_order::Model,
        applied: &MovementOutcome,
    ) {
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PurchaseReceiptApplied {
                    purchase_id: purchase.id,
                    material_id: applied.movement.material_id,
                    movement_id: applied.movement.id,
                    quantity: applied.movement.quantity,
                })
                .await;
        }
    }

    async fn emit_receipt_reversed(
        &self,
        purchase: &purchase_order::Model,
        reversed: &MovementOutcome,
    ) {
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PurchaseReceiptReversed {
                    purchase_id: purchase.id,
                    material_id: reversed.movement.material_id,
                    movement_id: reversed.movement.id,
                    quantity: reversed.movement.quantity,
                })
                .await;
        }
    }
}

fn validate_new_purchase(new: &NewPurchaseOrder) -> Result<(), ServiceError> {
    if new.supplier.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Supplier must not be empty".to_string(),
        ));
    }
    if new.quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Ordered quantity must be positive".to_string(),
        ));
    }
    if new.unit_price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Unit price cannot be negative".to_string(),
        ));
    }
    if let Some(received) = new.received_quantity {
        if received <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Received quantity must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_update(update: &PurchaseUpdate) -> Result<(), ServiceError> {
    if let Some(supplier) = &update.supplier {
        if supplier.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Supplier must not be empty".to_string(),
            ));
        }
    }
    if let Some(quantity) = update.quantity {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Ordered quantity must be positive".to_string(),
            ));
        }
    }
    if let Some(unit_price) = update.unit_price {
        if unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Unit price cannot be negative".to_string(),
            ));
        }
    }
    if let Some(received) = update.received_quantity {
        if received <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Received quantity must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

fn unwrap_transaction_error(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// Loads a purchase row under an exclusive lock so concurrent status flips
/// for the same purchase serialize.
async fn lock_purchase(
    txn: &sea_orm::DatabaseTransaction,
    purchase_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrderEntity::find_by_id(purchase_id)
        .filter(purchase_order::Column::IsArchived.eq(false))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", purchase_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseStatus::{Cancelled, Pending, Received};

    #[test]
    fn transition_table_matches_receipt_rules() {
        // Entering RECEIVED books a receipt.
        assert_eq!(receipt_effect(Pending, Received), ReceiptEffect::Apply);
        assert_eq!(receipt_effect(Cancelled, Received), ReceiptEffect::Apply);

        // Leaving RECEIVED reverses it.
        assert_eq!(receipt_effect(Received, Pending), ReceiptEffect::Reverse);
        assert_eq!(receipt_effect(Received, Cancelled), ReceiptEffect::Reverse);

        // Everything else has no ledger effect.
        assert_eq!(receipt_effect(Pending, Cancelled), ReceiptEffect::None);
        assert_eq!(receipt_effect(Cancelled, Pending), ReceiptEffect::None);
        assert_eq!(receipt_effect(Received, Received), ReceiptEffect::None);
        assert_eq!(receipt_effect(Pending, Pending), ReceiptEffect::None);
    }

    #[test]
    fn new_purchase_validation() {
        let base = NewPurchaseOrder {
            material_id: Uuid::new_v4(),
            supplier: "Hardwood & Co".to_string(),
            quantity: rust_decimal_macros::dec!(10),
            unit_price: rust_decimal_macros::dec!(4.50),
            status: Pending,
            delivery_date: None,
            received_quantity: None,
            notes: None,
        };
        assert!(validate_new_purchase(&base).is_ok());

        let mut bad = base.clone();
        bad.quantity = rust_decimal_macros::dec!(0);
        assert!(validate_new_purchase(&bad).is_err());

        let mut bad = base.clone();
        bad.supplier = "  ".to_string();
        assert!(validate_new_purchase(&bad).is_err());

        let mut bad = base;
        bad.received_quantity = Some(rust_decimal_macros::dec!(-1));
        assert!(validate_new_purchase(&bad).is_err());
    }
}
