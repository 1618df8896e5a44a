use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, EntityTrait,
    QuerySelect, TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        material::{self, Entity as MaterialEntity},
        purchase_order,
        stock_movement::{self, MovementSource, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{ledger, stock},
};

/// Request payload for a manually initiated movement.
///
/// For `IN`/`OUT` the quantity is a positive delta; for `ADJUST` it is the
/// new absolute stock level.
#[derive(Debug, Clone)]
pub struct NewManualMovement {
    pub material_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    /// Workshop order the material was consumed against, for traceability.
    pub order_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub notes: Option<String>,
}

/// A committed ledger mutation: the movement written (or deactivated) and
/// the material's new cached stock.
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub movement: stock_movement::Model,
    pub qty_on_hand: Decimal,
}

/// Result of requesting a purchase receipt.
#[derive(Debug, Clone)]
pub enum ReceiptOutcome {
    Applied(MovementOutcome),
    /// An active movement already existed for the purchase; retried status
    /// updates land here instead of duplicating stock.
    AlreadyApplied {
        movement: stock_movement::Model,
        qty_on_hand: Decimal,
    },
}

impl ReceiptOutcome {
    pub fn movement(&self) -> &stock_movement::Model {
        match self {
            Self::Applied(outcome) => &outcome.movement,
            Self::AlreadyApplied { movement, .. } => movement,
        }
    }

    pub fn qty_on_hand(&self) -> Decimal {
        match self {
            Self::Applied(outcome) => outcome.qty_on_hand,
            Self::AlreadyApplied { qty_on_hand, .. } => *qty_on_hand,
        }
    }

    pub fn already_applied(&self) -> bool {
        matches!(self, Self::AlreadyApplied { .. })
    }
}

/// Result of requesting a purchase-receipt reversal.
#[derive(Debug, Clone)]
pub enum ReversalOutcome {
    Reversed(MovementOutcome),
    /// No active movement was tied to the purchase; the retry is safe.
    NothingToReverse { qty_on_hand: Decimal },
}

impl ReversalOutcome {
    pub fn qty_on_hand(&self) -> Decimal {
        match self {
            Self::Reversed(outcome) => outcome.qty_on_hand,
            Self::NothingToReverse { qty_on_hand } => *qty_on_hand,
        }
    }
}

/// Result of re-issuing a receipt after a RECEIVED-state field edit.
#[derive(Debug, Clone)]
pub struct ReissueOutcome {
    /// The superseded movement, now inactive. `None` when no active
    /// movement existed and the receipt was booked fresh.
    pub retired: Option<stock_movement::Model>,
    pub movement: stock_movement::Model,
    pub qty_on_hand: Decimal,
}

/// The transactional boundary of the ledger: the only component allowed to
/// append a movement record and update the cached stock figure together.
///
/// Every public operation runs in a single database transaction and
/// re-reads the material row under an exclusive lock before validating, so
/// concurrent writers against the same material serialize instead of both
/// validating against a stale balance. On any failure the transaction
/// rolls back; no partial effect is ever observable.
#[derive(Clone)]
pub struct MovementService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl MovementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Records a manual `IN`/`OUT`/`ADJUST` movement.
    ///
    /// `OUT` movements that would drive stock negative are rejected with
    /// the shortfall; `ADJUST` assigns the new absolute level.
    #[instrument(skip(self))]
    pub async fn record_manual_movement(
        &self,
        request: NewManualMovement,
    ) -> Result<MovementOutcome, ServiceError> {
        validate_manual_request(&request)?;

        let outcome = self
            .db
            .transaction::<_, MovementOutcome, ServiceError>(move |txn| {
                Box::pin(async move { record_manual_in(txn, &request).await })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            material_id = %outcome.movement.material_id,
            movement_id = %outcome.movement.id,
            movement_type = %outcome.movement.movement_type,
            qty_on_hand = %outcome.qty_on_hand,
            "Manual movement recorded"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::MovementRecorded {
                    material_id: outcome.movement.material_id,
                    movement_id: outcome.movement.id,
                    movement_type: outcome.movement.movement_type.to_string(),
                    quantity: outcome.movement.quantity,
                    qty_on_hand: outcome.qty_on_hand,
                })
                .await;
        }

        Ok(outcome)
    }

    /// Books the receipt movement for a purchase entering `RECEIVED`.
    ///
    /// Idempotent: if an active movement already exists for the purchase
    /// the call reports it as already applied instead of duplicating
    /// stock.
    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id))]
    pub async fn apply_purchase_receipt(
        &self,
        purchase: &purchase_order::Model,
    ) -> Result<ReceiptOutcome, ServiceError> {
        let po = purchase.clone();
        let outcome = self
            .db
            .transaction::<_, ReceiptOutcome, ServiceError>(move |txn| {
                Box::pin(async move { apply_receipt_in(txn, &po).await })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        match &outcome {
            ReceiptOutcome::Applied(applied) => {
                info!(
                    purchase_id = %purchase.id,
                    movement_id = %applied.movement.id,
                    quantity = %applied.movement.quantity,
                    "Purchase receipt applied"
                );
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
            ReceiptOutcome::AlreadyApplied { .. } => {
                info!(purchase_id = %purchase.id, "Purchase receipt already applied; no-op");
            }
        }

        Ok(outcome)
    }

    /// Reverses the receipt of a purchase leaving `RECEIVED`.
    ///
    /// Fails with the shortfall when the reversal would drive stock
    /// negative (received material already consumed); the purchase then
    /// stays `RECEIVED`.
    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id))]
    pub async fn reverse_purchase_receipt(
        &self,
        purchase: &purchase_order::Model,
    ) -> Result<ReversalOutcome, ServiceError> {
        let po = purchase.clone();
        let outcome = self
            .db
            .transaction::<_, ReversalOutcome, ServiceError>(move |txn| {
                Box::pin(async move { reverse_receipt_in(txn, &po).await })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        match &outcome {
            ReversalOutcome::Reversed(reversed) => {
                info!(
                    purchase_id = %purchase.id,
                    movement_id = %reversed.movement.id,
                    qty_on_hand = %reversed.qty_on_hand,
                    "Purchase receipt reversed"
                );
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
            ReversalOutcome::NothingToReverse { .. } => {
                info!(purchase_id = %purchase.id, "No active receipt movement to reverse; no-op");
            }
        }

        Ok(outcome)
    }

    /// Deactivates a manual movement and compensates the cached stock.
    ///
    /// Only `manual`-sourced movements qualify: purchase movements go
    /// through status transitions, adjustments are permanent, and order
    /// consumption is corrected with a compensating movement.
    #[instrument(skip(self))]
    pub async fn delete_manual_movement(
        &self,
        movement_id: Uuid,
    ) -> Result<MovementOutcome, ServiceError> {
        let outcome = self
            .db
            .transaction::<_, MovementOutcome, ServiceError>(move |txn| {
                Box::pin(async move { delete_manual_in(txn, movement_id).await })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            material_id = %outcome.movement.material_id,
            movement_id = %outcome.movement.id,
            qty_on_hand = %outcome.qty_on_hand,
            "Manual movement deactivated"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::MovementReversed {
                    material_id: outcome.movement.material_id,
                    movement_id: outcome.movement.id,
                    qty_on_hand: outcome.qty_on_hand,
                })
                .await;
        }

        Ok(outcome)
    }
}

fn validate_manual_request(request: &NewManualMovement) -> Result<(), ServiceError> {
    match request.movement_type {
        MovementType::In | MovementType::Out => {
            if request.quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Movement quantity must be positive".to_string(),
                ));
            }
        }
        MovementType::Adjust => {
            if request.quantity < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Adjusted stock level cannot be negative".to_string(),
                ));
            }
        }
    }

    if let Some(unit_cost) = request.unit_cost {
        if unit_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Unit cost cannot be negative".to_string(),
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

/// Re-reads the material row with an exclusive lock held until commit.
/// Every validation against current stock happens after this, never
/// against a value read earlier in the request.
async fn lock_material<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
) -> Result<material::Model, ServiceError> {
    MaterialEntity::find_by_id(material_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Material {} not found", material_id)))
}

async fn write_stock<C: ConnectionTrait>(
    conn: &C,
    material: material::Model,
    qty_on_hand: Decimal,
) -> Result<material::Model, ServiceError> {
    let mut active: material::ActiveModel = material.into();
    active.qty_on_hand = Set(qty_on_hand);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::DatabaseError)
}

fn total_cost(unit_cost: Option<Decimal>, quantity: Decimal) -> Option<Decimal> {
    // Rounded to two decimal places here and nowhere mid-ledger.
    unit_cost.map(|cost| (cost * quantity).round_dp(2))
}

async fn record_manual_in<C: ConnectionTrait>(
    conn: &C,
    request: &NewManualMovement,
) -> Result<MovementOutcome, ServiceError> {
    let material = lock_material(conn, request.material_id).await?;

    let (qty_after, source, unit_cost) = match request.movement_type {
        MovementType::In => (
            material.qty_on_hand + request.quantity,
            manual_source(request),
            request.unit_cost,
        ),
        MovementType::Out => {
            let remaining = material.qty_on_hand - request.quantity;
            if remaining < Decimal::ZERO {
                return Err(ServiceError::InsufficientStock {
                    material_id: material.id,
                    shortfall: -remaining,
                });
            }
            (remaining, manual_source(request), request.unit_cost)
        }
        // An adjustment assigns the new level outright; cost fields do not
        // apply to corrections.
        MovementType::Adjust => (request.quantity, MovementSource::Adjustment, None),
    };

    let row = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(material.id),
        order_id: Set(request.order_id),
        purchase_id: Set(None),
        created_by: Set(request.created_by),
        movement_type: Set(request.movement_type),
        source: Set(source),
        quantity: Set(request.quantity),
        unit: Set(material.unit.clone()),
        unit_cost: Set(unit_cost),
        total_cost: Set(total_cost(unit_cost, request.quantity)),
        qty_after: Set(qty_after),
        notes: Set(request.notes.clone()),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    };

    let movement = ledger::append(conn, row).await?;
    write_stock(conn, material, qty_after).await?;

    Ok(MovementOutcome {
        movement,
        qty_on_hand: qty_after,
    })
}

fn manual_source(request: &NewManualMovement) -> MovementSource {
    if request.order_id.is_some() {
        MovementSource::Order
    } else {
        MovementSource::Manual
    }
}

pub(crate) async fn apply_receipt_in<C: ConnectionTrait>(
    conn: &C,
    purchase: &purchase_order::Model,
) -> Result<ReceiptOutcome, ServiceError> {
    let material = lock_material(conn, purchase.material_id).await?;

    if let Some(existing) = ledger::find_active_by_purchase(conn, purchase.id).await? {
        return Ok(ReceiptOutcome::AlreadyApplied {
            movement: existing,
            qty_on_hand: material.qty_on_hand,
        });
    }

    let quantity = purchase.receipt_quantity();
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Purchase {} has no receivable quantity",
            purchase.id
        )));
    }

    let qty_after = material.qty_on_hand + quantity;

    let row = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(material.id),
        order_id: Set(None),
        purchase_id: Set(Some(purchase.id)),
        created_by: Set(None),
        movement_type: Set(MovementType::In),
        source: Set(MovementSource::Purchase),
        quantity: Set(quantity),
        unit: Set(material.unit.clone()),
        unit_cost: Set(Some(purchase.unit_price)),
        total_cost: Set(total_cost(Some(purchase.unit_price), quantity)),
        qty_after: Set(qty_after),
        notes: Set(Some(format!("Receipt of purchase from {}", purchase.supplier))),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    };

    let movement = ledger::append(conn, row).await?;
    write_stock(conn, material, qty_after).await?;

    Ok(ReceiptOutcome::Applied(MovementOutcome {
        movement,
        qty_on_hand: qty_after,
    }))
}

pub(crate) async fn reverse_receipt_in<C: ConnectionTrait>(
    conn: &C,
    purchase: &purchase_order::Model,
) -> Result<ReversalOutcome, ServiceError> {
    let material = lock_material(conn, purchase.material_id).await?;

    let movement = match ledger::find_active_by_purchase(conn, purchase.id).await? {
        Some(movement) => movement,
        None => {
            return Ok(ReversalOutcome::NothingToReverse {
                qty_on_hand: material.qty_on_hand,
            })
        }
    };

    let (retired, qty_on_hand) = retire_and_compensate(conn, material, movement).await?;

    Ok(ReversalOutcome::Reversed(MovementOutcome {
        movement: retired,
        qty_on_hand,
    }))
}

/// Reverses the existing receipt movement and books a fresh one reflecting
/// the purchase's current quantity and price, as one atomic operation.
/// Only the final balance is validated: an edit that raises the received
/// quantity must not trip over the transient negative mid-reissue.
pub(crate) async fn reissue_receipt_in<C: ConnectionTrait>(
    conn: &C,
    purchase: &purchase_order::Model,
) -> Result<ReissueOutcome, ServiceError> {
    let material = lock_material(conn, purchase.material_id).await?;

    let retired = match ledger::find_active_by_purchase(conn, purchase.id).await? {
        Some(existing) => Some(ledger::deactivate(conn, existing).await?),
        None => None,
    };

    let remaining = ledger::active_movements(conn, material.id).await?;
    let base = stock::replay(&remaining).current_stock;

    let quantity = purchase.receipt_quantity();
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Purchase {} has no receivable quantity",
            purchase.id
        )));
    }

    let qty_after = base + quantity;
    if qty_after < Decimal::ZERO {
        return Err(ServiceError::InsufficientStock {
            material_id: material.id,
            shortfall: -qty_after,
        });
    }

    let row = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(material.id),
        order_id: Set(None),
        purchase_id: Set(Some(purchase.id)),
        created_by: Set(None),
        movement_type: Set(MovementType::In),
        source: Set(MovementSource::Purchase),
        quantity: Set(quantity),
        unit: Set(material.unit.clone()),
        unit_cost: Set(Some(purchase.unit_price)),
        total_cost: Set(total_cost(Some(purchase.unit_price), quantity)),
        qty_after: Set(qty_after),
        notes: Set(Some("Receipt re-issued after purchase edit".to_string())),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    };

    let movement = ledger::append(conn, row).await?;
    write_stock(conn, material, qty_after).await?;

    Ok(ReissueOutcome {
        retired,
        movement,
        qty_on_hand: qty_after,
    })
}

async fn delete_manual_in<C: ConnectionTrait>(
    conn: &C,
    movement_id: Uuid,
) -> Result<MovementOutcome, ServiceError> {
    let movement = stock_movement::Entity::find_by_id(movement_id)
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Movement {} not found", movement_id)))?;

    match movement.source {
        MovementSource::Purchase => {
            return Err(ServiceError::ImmutableMovement(
                "Purchase-sourced movements are reversed through purchase status changes"
                    .to_string(),
            ))
        }
        MovementSource::Adjustment => {
            return Err(ServiceError::ImmutableMovement(
                "Adjustments are permanent corrections; record a new adjustment instead"
                    .to_string(),
            ))
        }
        MovementSource::Order => {
            return Err(ServiceError::ImmutableMovement(
                "Order consumption is corrected with a compensating movement".to_string(),
            ))
        }
        MovementSource::Manual => {}
    }

    if movement.movement_type == MovementType::Adjust {
        return Err(ServiceError::ImmutableMovement(
            "Adjustments are permanent corrections; record a new adjustment instead".to_string(),
        ));
    }

    if !movement.is_active {
        return Err(ServiceError::InvalidOperation(format!(
            "Movement {} is already inactive",
            movement_id
        )));
    }

    let material = lock_material(conn, movement.material_id).await?;
    let (retired, qty_on_hand) = retire_and_compensate(conn, material, movement).await?;

    Ok(MovementOutcome {
        movement: retired,
        qty_on_hand,
    })
}

/// The single deactivate-and-compensate operation: flips the record off,
/// replays the remaining active ledger, rejects a negative result, and
/// writes the replayed balance into the cache. Replaying (rather than
/// subtracting the record's quantity) keeps the cache equal to the ledger
/// even when a later adjustment shadows the retired record.
async fn retire_and_compensate<C: ConnectionTrait>(
    conn: &C,
    material: material::Model,
    movement: stock_movement::Model,
) -> Result<(stock_movement::Model, Decimal), ServiceError> {
    let material_id = material.id;
    let retired = ledger::deactivate(conn, movement).await?;

    let remaining = ledger::active_movements(conn, material_id).await?;
    let balance = stock::replay(&remaining);

    if balance.current_stock < Decimal::ZERO {
        // Rolls back the deactivation along with everything else.
        return Err(ServiceError::InsufficientStock {
            material_id,
            shortfall: -balance.current_stock,
        });
    }

    write_stock(conn, material, balance.current_stock).await?;

    Ok((retired, balance.current_stock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(movement_type: MovementType, quantity: Decimal) -> NewManualMovement {
        NewManualMovement {
            material_id: Uuid::new_v4(),
            movement_type,
            quantity,
            unit_cost: None,
            order_id: None,
            created_by: None,
            notes: None,
        }
    }

    #[test]
    fn rejects_non_positive_in_and_out() {
        assert!(validate_manual_request(&request(MovementType::In, dec!(0))).is_err());
        assert!(validate_manual_request(&request(MovementType::Out, dec!(-5))).is_err());
        assert!(validate_manual_request(&request(MovementType::In, dec!(0.001))).is_ok());
    }

    #[test]
    fn adjust_allows_zero_but_not_negative() {
        assert!(validate_manual_request(&request(MovementType::Adjust, dec!(0))).is_ok());
        assert!(validate_manual_request(&request(MovementType::Adjust, dec!(-1))).is_err());
    }

    #[test]
    fn rejects_negative_unit_cost() {
        let mut req = request(MovementType::In, dec!(10));
        req.unit_cost = Some(dec!(-2));
        assert!(validate_manual_request(&req).is_err());
    }

    #[test]
    fn total_cost_rounds_to_cents() {
        assert_eq!(total_cost(Some(dec!(0.333)), dec!(3)), Some(dec!(1.00)));
        assert_eq!(total_cost(None, dec!(3)), None);
    }
}
