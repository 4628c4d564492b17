mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{date, seed_conversion, seed_item, seed_lot, seed_order, LotSeed, TestEngine, PRODUCT};
use lot_allocation::config::{AllocationConfig, CommitReservationStatus};
use lot_allocation::entities::demand_order::AllocationStatus;
use lot_allocation::entities::lot::InspectionStatus;
use lot_allocation::entities::reservation::{ReservationStatus, SourceType};
use lot_allocation::entities::reservation_history::HistoryOperation;
use lot_allocation::events::Event;
use lot_allocation::services::allocation::CommitOptions;
use lot_allocation::services::allocation_policy::LotAllocation;
use lot_allocation::services::erp_gateway::MockSuccessGateway;
use lot_allocation::services::unit_conversion;
use lot_allocation::ServiceError;

#[tokio::test]
async fn splits_demand_across_lots_in_expiry_order() {
    let mut engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", Some("ERP-100")).await;
    let a = seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2025, 12, 1)))).await;
    let b = seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2026, 1, 1)))).await;
    let (order, lines) =
        seed_order(&engine.db, SourceType::Order, date(2025, 11, 1), &[(PRODUCT, dec!(100), "EA")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();
    assert_eq!(
        plan.lines[0].allocations,
        vec![
            LotAllocation { lot_id: a.id, quantity: dec!(60), priority: 1 },
            LotAllocation { lot_id: b.id, quantity: dec!(40), priority: 2 },
        ]
    );
    assert_eq!(plan.lines[0].shortage, Decimal::ZERO);
    assert!(engine.all_reservations().await.is_empty(), "preview must not persist");

    let result = engine
        .service
        .commit(order.id, CommitOptions::default())
        .await
        .unwrap();
    assert_eq!(result.reservations.len(), 2);
    assert!(result.shortages.is_empty());
    for reservation in &result.reservations {
        assert_eq!(reservation.status, ReservationStatus::Active);
        assert_eq!(reservation.source_id, lines[0].id);
        assert_eq!(reservation.source_type, SourceType::Order);
        let history = engine.history(reservation.id).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, HistoryOperation::Insert);
        assert_eq!(history[0].new_status, Some(ReservationStatus::Active));
    }
    assert_eq!(engine.order_status(order.id).await, AllocationStatus::Allocated);

    let events = engine.drain_events();
    assert_matches!(
        events.last(),
        Some(Event::ReservationsCommitted { order_id, reservation_ids, shortage_lines: 0 })
            if *order_id == order.id && reservation_ids.len() == 2
    );
}

#[tokio::test]
async fn shortage_is_reported_not_raised() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let lot = seed_lot(&engine.db, LotSeed::new(dec!(50), date(2025, 1, 1), None)).await;
    let (order, lines) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(100), "EA")]).await;

    let result = engine
        .service
        .commit(order.id, CommitOptions::default())
        .await
        .unwrap();

    assert_eq!(result.reservations.len(), 1);
    assert_eq!(result.reservations[0].lot_id, lot.id);
    assert_eq!(result.reservations[0].reserved_qty, dec!(50));
    assert_eq!(result.shortages.len(), 1);
    assert_eq!(result.shortages[0].line_id, lines[0].id);
    assert_eq!(result.shortages[0].shortage, dec!(50));
    assert_eq!(
        engine.order_status(order.id).await,
        AllocationStatus::PartiallyAllocated
    );
}

#[tokio::test]
async fn single_lot_fit_prefers_sooner_expiry_lot_that_covers() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    seed_lot(&engine.db, LotSeed::new(dec!(200), date(2025, 1, 1), Some(date(2026, 6, 1)))).await;
    let b = seed_lot(&engine.db, LotSeed::new(dec!(30), date(2025, 2, 1), Some(date(2025, 12, 1)))).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 11, 1), &[(PRODUCT, dec!(30), "EA")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();
    assert_eq!(
        plan.lines[0].allocations,
        vec![LotAllocation { lot_id: b.id, quantity: dec!(30), priority: 1 }]
    );
}

#[tokio::test]
async fn stale_plan_fails_whole_commit_and_persists_nothing() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let a = seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2025, 12, 1)))).await;
    seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2026, 1, 1)))).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 11, 1), &[(PRODUCT, dec!(100), "EA")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();

    // Stock shipped from lot A between preview and commit.
    engine.set_lot_quantity(a.id, dec!(20)).await;

    let err = engine
        .service
        .commit_plan(&plan, CommitOptions::default())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::AllocationCommit { lot_id, required, available, .. }
            if lot_id == a.id && required == dec!(60) && available == dec!(20)
    );
    assert!(!err.is_retryable());
    assert!(engine.all_reservations().await.is_empty());
    assert_eq!(engine.order_status(order.id).await, AllocationStatus::Unallocated);
}

#[tokio::test]
async fn confirmed_reservation_from_another_demand_invalidates_plan() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let lot = seed_lot(&engine.db, LotSeed::new(dec!(50), date(2025, 1, 1), None)).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Forecast, date(2025, 6, 1), &[(PRODUCT, dec!(40), "EA")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();
    assert_eq!(plan.lines[0].allocations[0].quantity, dec!(40));

    let competing = common::seed_reservation(
        &engine,
        lot.id,
        SourceType::Order,
        dec!(30),
        ReservationStatus::Active,
    )
    .await;
    engine
        .service
        .confirm(competing.id, "test")
        .await
        .unwrap();

    let err = engine
        .service
        .commit_plan(&plan, CommitOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AllocationCommit { available, .. } if available == dec!(20));
    assert_eq!(engine.reservations_on(lot.id).await.len(), 1);
}

#[tokio::test]
async fn commit_replans_against_current_stock() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let a = seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2025, 12, 1)))).await;
    let b = seed_lot(&engine.db, LotSeed::new(dec!(60), date(2025, 1, 1), Some(date(2026, 1, 1)))).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 11, 1), &[(PRODUCT, dec!(50), "EA")]).await;

    engine.set_lot_quantity(a.id, dec!(10)).await;

    let result = engine
        .service
        .commit(order.id, CommitOptions::default())
        .await
        .unwrap();
    assert_eq!(result.reservations.len(), 1);
    assert_eq!(result.reservations[0].lot_id, b.id);
}

#[tokio::test]
async fn ineligible_lots_never_allocated() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;

    let mut pending = LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 7, 1)));
    pending.inspection = InspectionStatus::Pending;
    seed_lot(&engine.db, pending).await;

    let mut failed = LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 7, 2)));
    failed.inspection = InspectionStatus::Failed;
    seed_lot(&engine.db, failed).await;

    // Expires before the ship date.
    seed_lot(&engine.db, LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 5, 1)))).await;

    let mut elsewhere = LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 7, 3)));
    elsewhere.warehouse_id = 99;
    seed_lot(&engine.db, elsewhere).await;

    let mut held = LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 7, 4)));
    held.locked = dec!(95);
    let held = seed_lot(&engine.db, held).await;

    let passed = {
        let mut seed = LotSeed::new(dec!(100), date(2025, 1, 1), Some(date(2025, 8, 1)));
        seed.inspection = InspectionStatus::Passed;
        seed_lot(&engine.db, seed).await
    };

    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(20), "EA")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();
    assert_eq!(
        plan.lines[0].allocations,
        vec![LotAllocation { lot_id: passed.id, quantity: dec!(20), priority: 1 }]
    );

    let (small, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(5), "EA")]).await;
    let plan = engine.service.preview(small.id).await.unwrap();
    assert_eq!(plan.lines[0].allocations[0].lot_id, held.id);
}

#[tokio::test]
async fn external_units_are_converted_before_allocation() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    seed_conversion(&engine.db, PRODUCT, "CS", dec!(12)).await;
    seed_lot(&engine.db, LotSeed::new(dec!(100), date(2025, 1, 1), None)).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(5), "cs")]).await;

    let plan = engine.service.preview(order.id).await.unwrap();
    assert_eq!(plan.lines[0].required_qty, dec!(60));
    assert_eq!(plan.lines[0].allocations[0].quantity, dec!(60));

    let item = unit_conversion::load_item(&*engine.db, PRODUCT).await.unwrap();
    let cases = unit_conversion::from_internal_qty(&*engine.db, &item, dec!(30), "CS")
        .await
        .unwrap();
    assert_eq!(cases, dec!(2.5));

    let (unmapped, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(1), "PAL")]).await;
    let err = engine.service.preview(unmapped.id).await.unwrap_err();
    assert_matches!(err, ServiceError::Conversion { product_id: PRODUCT, ref unit } if unit == "PAL");
}

#[tokio::test]
async fn lines_of_one_order_do_not_double_book_a_lot() {
    let engine = TestEngine::new().await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let lot = seed_lot(&engine.db, LotSeed::new(dec!(100), date(2025, 1, 1), None)).await;
    let (order, _) = seed_order(
        &engine.db,
        SourceType::Order,
        date(2025, 6, 1),
        &[(PRODUCT, dec!(60), "EA"), (PRODUCT, dec!(60), "EA")],
    )
    .await;

    let result = engine
        .service
        .commit(order.id, CommitOptions::default())
        .await
        .unwrap();
    let reserved: Decimal = result.reservations.iter().map(|r| r.reserved_qty).sum();
    assert_eq!(reserved, dec!(100));
    assert_eq!(result.shortages.len(), 1);
    assert_eq!(result.shortages[0].shortage, dec!(20));
    assert!(result.reservations.iter().all(|r| r.lot_id == lot.id));
}

#[tokio::test]
async fn unmapped_item_blocks_commit_when_mapping_required() {
    let config = AllocationConfig {
        require_external_mapping: true,
        ..AllocationConfig::default()
    };
    let engine = TestEngine::with(config, Arc::new(MockSuccessGateway)).await;
    seed_item(&engine.db, PRODUCT, "EA", None).await;
    let lot = seed_lot(&engine.db, LotSeed::new(dec!(100), date(2025, 1, 1), None)).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(10), "EA")]).await;

    let err = engine
        .service
        .commit(order.id, CommitOptions::default())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::UnmappedItem { lot_id, product_id: PRODUCT, ref item_code }
            if lot_id == lot.id && item_code == "SKU-100"
    );
    assert_eq!(err.error_code(), "unmapped_item");
    assert!(engine.all_reservations().await.is_empty());
}

#[tokio::test]
async fn commit_with_confirm_registers_every_reservation() {
    let config = AllocationConfig {
        reservation_status_on_commit: CommitReservationStatus::Temporary,
        ..AllocationConfig::default()
    };
    let engine = TestEngine::with(config, Arc::new(MockSuccessGateway)).await;
    seed_item(&engine.db, PRODUCT, "EA", Some("ERP-100")).await;
    seed_lot(&engine.db, LotSeed::new(dec!(30), date(2025, 1, 1), Some(date(2025, 9, 1)))).await;
    seed_lot(&engine.db, LotSeed::new(dec!(30), date(2025, 1, 1), Some(date(2025, 10, 1)))).await;
    let (order, _) =
        seed_order(&engine.db, SourceType::Order, date(2025, 6, 1), &[(PRODUCT, dec!(45), "EA")]).await;

    let result = engine
        .service
        .commit(
            order.id,
            CommitOptions {
                confirm: true,
                actor: Some("planner".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.confirmations.len(), 2);
    assert!(result.confirmations.iter().all(|c| c.confirmed));
    for reservation in &result.reservations {
        let stored = engine.reservation(reservation.id).await;
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert!(stored.sap_document_no.as_deref().unwrap().starts_with("MOCK-"));
        assert!(stored.confirmed_at.is_some());

        let operations: Vec<HistoryOperation> = engine
            .history(reservation.id)
            .await
            .into_iter()
            .map(|h| h.operation)
            .collect();
        assert_eq!(
            operations,
            vec![
                HistoryOperation::Insert,
                HistoryOperation::Activate,
                HistoryOperation::Confirm
            ]
        );
    }
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let engine = TestEngine::new().await;
    let err = engine.service.preview(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
