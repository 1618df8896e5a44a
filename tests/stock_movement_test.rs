mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;
use workshop_api::{
    entities::stock_movement::{MovementSource, MovementType},
    errors::ServiceError,
    services::{ledger::MovementFilter, movements::NewManualMovement},
};

fn manual(material_id: Uuid, movement_type: MovementType, quantity: Decimal) -> NewManualMovement {
    NewManualMovement {
        material_id,
        movement_type,
        quantity,
        unit_cost: None,
        order_id: None,
        created_by: None,
        notes: None,
    }
}

#[tokio::test]
async fn manual_in_and_out_update_cache_and_snapshot() {
    let app = TestApp::new().await;
    let material = app.create_material("Oak board").await;

    let mut request = manual(material.id, MovementType::In, dec!(100));
    request.unit_cost = Some(dec!(2.50));
    let received = app
        .movements
        .record_manual_movement(request)
        .await
        .expect("Failed to record IN movement");

    assert_eq!(received.qty_on_hand, dec!(100));
    assert_eq!(received.movement.qty_after, dec!(100));
    assert_eq!(received.movement.source, MovementSource::Manual);
    assert_eq!(received.movement.total_cost, Some(dec!(250.00)));
    assert_eq!(received.movement.unit, "pcs");
    assert_eq!(app.qty_on_hand(material.id).await, dec!(100));

    let mut consumption = manual(material.id, MovementType::Out, dec!(30));
    consumption.order_id = Some(Uuid::new_v4());
    let consumed = app
        .movements
        .record_manual_movement(consumption)
        .await
        .expect("Failed to record OUT movement");

    assert_eq!(consumed.qty_on_hand, dec!(70));
    assert_eq!(consumed.movement.qty_after, dec!(70));
    // Order-linked consumption is tagged with the order source.
    assert_eq!(consumed.movement.source, MovementSource::Order);

    let balance = app
        .stock
        .compute_balance(material.id)
        .await
        .expect("Failed to compute balance");
    assert_eq!(balance.total_in, dec!(100));
    assert_eq!(balance.total_out, dec!(30));
    assert_eq!(balance.current_stock, dec!(70));
    assert_eq!(balance.movement_count, 2);
}

#[tokio::test]
async fn out_exceeding_stock_is_rejected_with_shortfall() {
    let app = TestApp::new().await;
    let material = app.create_material("Brass screw").await;

    app.movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(10)))
        .await
        .expect("Failed to record IN movement");

    let err = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Out, dec!(25)))
        .await
        .expect_err("OUT beyond stock must fail");

    assert_matches!(
        err,
        ServiceError::InsufficientStock { shortfall, .. } if shortfall == dec!(15)
    );

    // The rejection left no partial state behind.
    assert_eq!(app.qty_on_hand(material.id).await, dec!(10));
    let (movements, total) = app
        .ledger
        .list_for_material(material.id, &MovementFilter::default(), 1, 50)
        .await
        .expect("Failed to list movements");
    assert_eq!(total, 1);
    assert_eq!(movements.len(), 1);
}

#[tokio::test]
async fn zero_quantity_and_unknown_material_are_rejected() {
    let app = TestApp::new().await;
    let material = app.create_material("Felt pad").await;

    let err = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(0)))
        .await
        .expect_err("zero quantity must fail");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .movements
        .record_manual_movement(manual(Uuid::new_v4(), MovementType::In, dec!(5)))
        .await
        .expect_err("unknown material must fail");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn adjust_assigns_absolute_level() {
    let app = TestApp::new().await;
    let material = app.create_material("Walnut plank").await;

    app.movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(70)))
        .await
        .expect("Failed to record IN movement");

    let adjusted = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Adjust, dec!(50)))
        .await
        .expect("Failed to record adjustment");

    assert_eq!(adjusted.qty_on_hand, dec!(50));
    assert_eq!(adjusted.movement.qty_after, dec!(50));
    assert_eq!(adjusted.movement.source, MovementSource::Adjustment);

    // The correction is the baseline for later deltas, not an additive
    // term on top of the earlier IN.
    let balance = app
        .stock
        .compute_balance(material.id)
        .await
        .expect("Failed to compute balance");
    assert_eq!(balance.current_stock, dec!(50));

    let topped_up = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(10)))
        .await
        .expect("Failed to record IN after adjustment");
    assert_eq!(topped_up.qty_on_hand, dec!(60));
}

#[tokio::test]
async fn adjust_to_zero_is_allowed_but_negative_is_not() {
    let app = TestApp::new().await;
    let material = app.create_material("Glue stick").await;

    app.movements
        .record_manual_movement(manual(material.id, MovementType::Adjust, dec!(0)))
        .await
        .expect("Adjust to zero must be allowed");
    assert_eq!(app.qty_on_hand(material.id).await, dec!(0));

    let err = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Adjust, dec!(-1)))
        .await
        .expect_err("negative adjustment must fail");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn deleting_a_manual_movement_compensates_the_balance() {
    let app = TestApp::new().await;
    let material = app.create_material("Steel rod").await;

    app.movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(100)))
        .await
        .expect("Failed to record IN movement");
    let out = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Out, dec!(30)))
        .await
        .expect("Failed to record OUT movement");
    assert_eq!(out.qty_on_hand, dec!(70));

    let deleted = app
        .movements
        .delete_manual_movement(out.movement.id)
        .await
        .expect("Failed to delete OUT movement");
    assert!(!deleted.movement.is_active);
    assert_eq!(deleted.qty_on_hand, dec!(100));
    assert_eq!(app.qty_on_hand(material.id).await, dec!(100));

    // The record survives for audit, just deactivated.
    let (active, _) = app
        .ledger
        .list_for_material(material.id, &MovementFilter::default(), 1, 50)
        .await
        .expect("Failed to list active movements");
    assert_eq!(active.len(), 1);

    let filter = MovementFilter {
        include_inactive: true,
        ..Default::default()
    };
    let (all, _) = app
        .ledger
        .list_for_material(material.id, &filter, 1, 50)
        .await
        .expect("Failed to list all movements");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn deleting_an_in_movement_cannot_strand_negative_stock() {
    let app = TestApp::new().await;
    let material = app.create_material("Copper wire").await;

    let received = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(100)))
        .await
        .expect("Failed to record IN movement");
    app.movements
        .record_manual_movement(manual(material.id, MovementType::Out, dec!(80)))
        .await
        .expect("Failed to record OUT movement");

    let err = app
        .movements
        .delete_manual_movement(received.movement.id)
        .await
        .expect_err("deleting consumed intake must fail");
    assert_matches!(
        err,
        ServiceError::InsufficientStock { shortfall, .. } if shortfall == dec!(80)
    );

    // Rolled back: the movement is still active and stock unchanged.
    assert_eq!(app.qty_on_hand(material.id).await, dec!(20));
    let (active, _) = app
        .ledger
        .list_for_material(material.id, &MovementFilter::default(), 1, 50)
        .await
        .expect("Failed to list movements");
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn immutable_sources_cannot_be_deleted() {
    let app = TestApp::new().await;
    let material = app.create_material("Leather strap").await;

    let adjusted = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Adjust, dec!(40)))
        .await
        .expect("Failed to record adjustment");
    let err = app
        .movements
        .delete_manual_movement(adjusted.movement.id)
        .await
        .expect_err("adjustments are permanent");
    assert_matches!(err, ServiceError::ImmutableMovement(_));

    let mut order_out = manual(material.id, MovementType::Out, dec!(5));
    order_out.order_id = Some(Uuid::new_v4());
    let consumed = app
        .movements
        .record_manual_movement(order_out)
        .await
        .expect("Failed to record order consumption");
    let err = app
        .movements
        .delete_manual_movement(consumed.movement.id)
        .await
        .expect_err("order consumption is not manually deletable");
    assert_matches!(err, ServiceError::ImmutableMovement(_));

    assert_eq!(app.qty_on_hand(material.id).await, dec!(35));
}

#[tokio::test]
async fn double_delete_is_rejected() {
    let app = TestApp::new().await;
    let material = app.create_material("Pine slat").await;

    app.movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(10)))
        .await
        .expect("Failed to record IN movement");
    let out = app
        .movements
        .record_manual_movement(manual(material.id, MovementType::Out, dec!(4)))
        .await
        .expect("Failed to record OUT movement");

    app.movements
        .delete_manual_movement(out.movement.id)
        .await
        .expect("first delete succeeds");
    let err = app
        .movements
        .delete_manual_movement(out.movement.id)
        .await
        .expect_err("second delete must fail");
    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(app.qty_on_hand(material.id).await, dec!(10));
}

#[tokio::test]
async fn ledger_listing_filters_and_orders_newest_first() {
    let app = TestApp::new().await;
    let material = app.create_material("Canvas sheet").await;
    let order_id = Uuid::new_v4();

    app.movements
        .record_manual_movement(manual(material.id, MovementType::In, dec!(20)))
        .await
        .expect("Failed to record IN movement");
    let mut order_out = manual(material.id, MovementType::Out, dec!(8));
    order_out.order_id = Some(order_id);
    app.movements
        .record_manual_movement(order_out)
        .await
        .expect("Failed to record order consumption");
    app.movements
        .record_manual_movement(manual(material.id, MovementType::Adjust, dec!(15)))
        .await
        .expect("Failed to record adjustment");

    let (newest_first, total) = app
        .ledger
        .list_for_material(material.id, &MovementFilter::default(), 1, 50)
        .await
        .expect("Failed to list movements");
    assert_eq!(total, 3);
    assert_eq!(newest_first[0].movement_type, MovementType::Adjust);

    let by_source = MovementFilter {
        source: Some(MovementSource::Order),
        ..Default::default()
    };
    let (order_movements, _) = app
        .ledger
        .list_for_material(material.id, &by_source, 1, 50)
        .await
        .expect("Failed to filter by source");
    assert_eq!(order_movements.len(), 1);
    assert_eq!(order_movements[0].order_id, Some(order_id));

    let by_type = MovementFilter {
        movement_type: Some(MovementType::In),
        ..Default::default()
    };
    let (intakes, _) = app
        .ledger
        .list_for_material(material.id, &by_type, 1, 50)
        .await
        .expect("Failed to filter by type");
    assert_eq!(intakes.len(), 1);
    assert_eq!(intakes[0].quantity, dec!(20));
}
