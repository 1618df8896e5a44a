#![allow(dead_code)]

use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use workshop_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::material,
    events::{Event, EventSender},
    services::{
        ledger::LedgerStore,
        materials::{MaterialService, NewMaterial},
        movements::MovementService,
        purchase_orders::PurchaseOrderService,
        stock::StockAggregator,
    },
};

/// Test harness over a private in-memory database with the full service
/// stack wired the way `AppState` wires it.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub materials: MaterialService,
    pub ledger: LedgerStore,
    pub stock: StockAggregator,
    pub movements: MovementService,
    pub purchases: PurchaseOrderService,
    pub events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        // A named shared-cache memory database so every pooled connection
        // sees the same schema, unique per test for isolation.
        let url = format!(
            "sqlite:file:workshop_test_{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        let config = DbConfig {
            url,
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };

        let db = Arc::new(
            establish_connection_with_config(&config)
                .await
                .expect("Failed to create test DB"),
        );
        run_migrations(&db).await.expect("Failed to run migrations");

        let (tx, events) = mpsc::channel(64);
        let sender = EventSender::new(tx);

        Self {
            materials: MaterialService::new(db.clone()),
            ledger: LedgerStore::new(db.clone()),
            stock: StockAggregator::new(db.clone(), Some(sender.clone())),
            movements: MovementService::new(db.clone(), Some(sender.clone())),
            purchases: PurchaseOrderService::new(db.clone(), Some(sender)),
            db,
            events,
        }
    }

    pub async fn create_material(&self, name: &str) -> material::Model {
        self.materials
            .create_material(NewMaterial {
                name: name.to_string(),
                unit: "pcs".to_string(),
                safety_stock: Decimal::ZERO,
                notes: None,
            })
            .await
            .expect("Failed to create material")
    }

    pub async fn qty_on_hand(&self, material_id: Uuid) -> Decimal {
        self.materials
            .get_material(material_id)
            .await
            .expect("Failed to load material")
            .expect("Material not found")
            .qty_on_hand
    }

    /// Drains every event published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
