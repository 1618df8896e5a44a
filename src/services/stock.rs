use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        material::{self, Entity as MaterialEntity},
        stock_movement::{self, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::ledger,
};

/// Stock figures derived purely from a material's active movements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockBalance {
    /// Gross sum of active `IN` quantities.
    pub total_in: Decimal,
    /// Gross sum of active `OUT` quantities.
    pub total_out: Decimal,
    /// Replayed balance, honoring `ADJUST` resets.
    pub current_stock: Decimal,
    pub movement_count: u64,
}

/// Result of comparing the cached stock figure against the replayed ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub material_id: Uuid,
    pub cached: Decimal,
    pub computed: Decimal,
    pub movement_count: u64,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.computed
    }

    /// Cached minus replayed; non-zero means drift.
    pub fn drift(&self) -> Decimal {
        self.cached - self.computed
    }
}

/// Replays active movements in chronological order.
///
/// `IN`/`OUT` are additive; an `ADJUST` resets the running balance to its
/// own `qty_after` (an absolute correction, not a delta), so the last
/// adjustment is the baseline for everything after it. Gross `total_in`/
/// `total_out` sums are unaffected by resets.
pub(crate) fn replay(movements: &[stock_movement::Model]) -> StockBalance {
    let mut total_in = Decimal::ZERO;
    let mut total_out = Decimal::ZERO;
    let mut current = Decimal::ZERO;

    for movement in movements {
        match movement.movement_type {
            MovementType::In => {
                total_in += movement.quantity;
                current += movement.quantity;
            }
            MovementType::Out => {
                total_out += movement.quantity;
                current -= movement.quantity;
            }
            MovementType::Adjust => {
                current = movement.qty_after;
            }
        }
    }

    StockBalance {
        total_in,
        total_out,
        current_stock: current,
        movement_count: movements.len() as u64,
    }
}

/// Derives current stock and movement statistics for a material from its
/// ledger. The single source of truth for "how much is on hand"; the
/// cached `qty_on_hand` column must always agree with it.
#[derive(Clone)]
pub struct StockAggregator {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl StockAggregator {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Replays the material's active movements into a balance.
    #[instrument(skip(self))]
    pub async fn compute_balance(&self, material_id: Uuid) -> Result<StockBalance, ServiceError> {
        self.find_material(material_id).await?;

        let movements = ledger::active_movements(&*self.db, material_id).await?;
        Ok(replay(&movements))
    }

    /// Compares the cached stock figure with the replayed ledger. Drift is
    /// logged and published for operator investigation, never silently
    /// corrected here.
    #[instrument(skip(self))]
    pub async fn check_material(
        &self,
        material_id: Uuid,
    ) -> Result<ConsistencyReport, ServiceError> {
        let material = self.find_material(material_id).await?;
        let movements = ledger::active_movements(&*self.db, material_id).await?;
        let balance = replay(&movements);

        let report = ConsistencyReport {
            material_id,
            cached: material.qty_on_hand,
            computed: balance.current_stock,
            movement_count: balance.movement_count,
        };

        if !report.is_consistent() {
            warn!(
                material_id = %material_id,
                cached = %report.cached,
                computed = %report.computed,
                "Stock drift detected"
            );
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::StockDriftDetected {
                        material_id,
                        cached: report.cached,
                        computed: report.computed,
                        detected_at: Utc::now(),
                    })
                    .await;
            }
        }

        Ok(report)
    }

    /// Strict variant of [`check_material`](Self::check_material): returns
    /// the typed drift error when the figures disagree.
    #[instrument(skip(self))]
    pub async fn verify_material(&self, material_id: Uuid) -> Result<(), ServiceError> {
        let report = self.check_material(material_id).await?;
        if report.is_consistent() {
            Ok(())
        } else {
            Err(ServiceError::ConsistencyDrift {
                material_id,
                cached: report.cached,
                computed: report.computed,
            })
        }
    }

    /// On-demand drift sweep over every material.
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> Result<Vec<ConsistencyReport>, ServiceError> {
        let materials = MaterialEntity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut reports = Vec::with_capacity(materials.len());
        for material in materials {
            reports.push(self.check_material(material.id).await?);
        }
        Ok(reports)
    }

    async fn find_material(&self, material_id: Uuid) -> Result<material::Model, ServiceError> {
        MaterialEntity::find_by_id(material_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Material {} not found", material_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::stock_movement::MovementSource;
    use rust_decimal_macros::dec;

    fn movement(
        movement_type: MovementType,
        quantity: Decimal,
        qty_after: Decimal,
    ) -> stock_movement::Model {
        stock_movement::Model {
            id: Uuid::new_v4(),
            material_id: Uuid::nil(),
            order_id: None,
            purchase_id: None,
            created_by: None,
            movement_type,
            source: MovementSource::Manual,
            quantity,
            unit: "pcs".to_string(),
            unit_cost: None,
            total_cost: None,
            qty_after,
            notes: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replay_sums_in_and_out() {
        let history = vec![
            movement(MovementType::In, dec!(100), dec!(100)),
            movement(MovementType::Out, dec!(30), dec!(70)),
            movement(MovementType::In, dec!(5), dec!(75)),
        ];

        let balance = replay(&history);
        assert_eq!(balance.total_in, dec!(105));
        assert_eq!(balance.total_out, dec!(30));
        assert_eq!(balance.current_stock, dec!(75));
        assert_eq!(balance.movement_count, 3);
    }

    #[test]
    fn adjust_resets_running_balance() {
        let history = vec![
            movement(MovementType::In, dec!(100), dec!(100)),
            movement(MovementType::Adjust, dec!(50), dec!(50)),
            movement(MovementType::Out, dec!(10), dec!(40)),
        ];

        let balance = replay(&history);
        // 50 is the baseline after the correction, not 100 - 10.
        assert_eq!(balance.current_stock, dec!(40));
        assert_eq!(balance.total_in, dec!(100));
        assert_eq!(balance.total_out, dec!(10));
    }

    #[test]
    fn last_adjust_wins() {
        let history = vec![
            movement(MovementType::Adjust, dec!(80), dec!(80)),
            movement(MovementType::In, dec!(20), dec!(100)),
            movement(MovementType::Adjust, dec!(5), dec!(5)),
        ];

        assert_eq!(replay(&history).current_stock, dec!(5));
    }

    #[test]
    fn empty_ledger_is_zero() {
        let balance = replay(&[]);
        assert_eq!(balance.current_stock, Decimal::ZERO);
        assert_eq!(balance.movement_count, 0);
    }

    #[test]
    fn report_drift_is_signed() {
        let report = ConsistencyReport {
            material_id: Uuid::nil(),
            cached: dec!(70),
            computed: dec!(75),
            movement_count: 4,
        };
        assert!(!report.is_consistent());
        assert_eq!(report.drift(), dec!(-5));
    }
}
