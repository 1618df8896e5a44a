pub mod ledger;
pub mod materials;
pub mod movements;
pub mod purchase_orders;
pub mod stock;
