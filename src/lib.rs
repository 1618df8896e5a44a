//! Workshop API Library
//!
//! Material inventory ledger and purchase-receipt automation for a
//! workshop operations backend. The ledger is the system of record for
//! stock; the cached per-material figure is a materialized view kept in
//! lockstep inside the same transaction.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Shared application state handed to the (out-of-scope) transport layer.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub materials: services::materials::MaterialService,
    pub ledger: services::ledger::LedgerStore,
    pub stock: services::stock::StockAggregator,
    pub movements: services::movements::MovementService,
    pub purchase_orders: services::purchase_orders::PurchaseOrderService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        Self {
            materials: services::materials::MaterialService::new(db.clone()),
            ledger: services::ledger::LedgerStore::new(db.clone()),
            stock: services::stock::StockAggregator::new(
                db.clone(),
                Some(event_sender.clone()),
            ),
            movements: services::movements::MovementService::new(
                db.clone(),
                Some(event_sender.clone()),
            ),
            purchase_orders: services::purchase_orders::PurchaseOrderService::new(
                db.clone(),
                Some(event_sender.clone()),
            ),
            db,
            config,
            event_sender,
        }
    }
}
