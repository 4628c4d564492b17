#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use lot_allocation::config::{AllocationConfig, AppConfig};
use lot_allocation::db;
use lot_allocation::entities::demand_order::AllocationStatus;
use lot_allocation::entities::lot::{InspectionStatus, LotStatus};
use lot_allocation::entities::reservation::{ReservationStatus, SourceType};
use lot_allocation::entities::{
    demand_line, demand_order, item, item_unit_conversion, lot, reservation, reservation_history,
};
use lot_allocation::events::{Event, EventSender};
use lot_allocation::services::allocation::AllocationService;
use lot_allocation::services::erp_gateway::{ErpGateway, MockSuccessGateway};

pub const PRODUCT: i64 = 100;
pub const WAREHOUSE: i64 = 1;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Fresh in-memory database with the schema applied. One connection, so every statement of a
/// test sees the same database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    Arc::new(pool)
}

/// Engine wired to a database, a gateway and a channel that captures published events.
pub struct TestEngine {
    pub db: Arc<DatabaseConnection>,
    pub service: AllocationService,
    pub events: mpsc::Receiver<Event>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with(AllocationConfig::default(), Arc::new(MockSuccessGateway)).await
    }

    pub async fn with(config: AllocationConfig, gateway: Arc<dyn ErpGateway>) -> Self {
        let db = setup_db().await;
        let (tx, rx) = mpsc::channel(256);
        let service = AllocationService::new(db.clone(), config, gateway, Arc::new(EventSender::new(tx)));
        Self {
            db,
            service,
            events: rx,
        }
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn lot(&self, id: i64) -> lot::Model {
        lot::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query lot")
            .expect("lot exists")
    }

    pub async fn reservation(&self, id: Uuid) -> reservation::Model {
        reservation::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query reservation")
            .expect("reservation exists")
    }

    pub async fn reservations_on(&self, lot_id: i64) -> Vec<reservation::Model> {
        reservation::Entity::find()
            .filter(reservation::Column::LotId.eq(lot_id))
            .all(&*self.db)
            .await
            .expect("query reservations")
    }

    pub async fn all_reservations(&self) -> Vec<reservation::Model> {
        reservation::Entity::find()
            .all(&*self.db)
            .await
            .expect("query reservations")
    }

    pub async fn history(&self, reservation_id: Uuid) -> Vec<reservation_history::Model> {
        self.service
            .reservations()
            .history_for(reservation_id)
            .await
            .expect("history")
    }

    pub async fn order_status(&self, order_id: Uuid) -> AllocationStatus {
        demand_order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
            .allocation_status
    }

    pub async fn set_lot_quantity(&self, lot_id: i64, quantity: Decimal) {
        let mut active: lot::ActiveModel = self.lot(lot_id).await.into();
        active.current_quantity = Set(quantity);
        active.update(&*self.db).await.expect("update lot");
    }

    pub async fn set_lot_status(&self, lot_id: i64, status: LotStatus) {
        let mut active: lot::ActiveModel = self.lot(lot_id).await.into();
        active.status = Set(status);
        active.update(&*self.db).await.expect("update lot");
    }
}

pub async fn seed_item(
    db: &DatabaseConnection,
    product_id: i64,
    internal_unit: &str,
    external_item_code: Option<&str>,
) -> item::Model {
    let now = Utc::now();
    item::ActiveModel {
        product_id: Set(product_id),
        item_code: Set(format!("SKU-{}", product_id)),
        internal_unit: Set(internal_unit.to_string()),
        external_item_code: Set(external_item_code.map(str::to_string)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed item")
}

pub async fn seed_conversion(db: &DatabaseConnection, product_id: i64, unit: &str, factor: Decimal) {
    item_unit_conversion::ActiveModel {
        product_id: Set(product_id),
        external_unit: Set(unit.to_string()),
        factor: Set(factor),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed conversion");
}

pub struct LotSeed {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub received: NaiveDate,
    pub expiry: Option<NaiveDate>,
    pub quantity: Decimal,
    pub locked: Decimal,
    pub inspection: InspectionStatus,
}

impl LotSeed {
    pub fn new(quantity: Decimal, received: NaiveDate, expiry: Option<NaiveDate>) -> Self {
        Self {
            product_id: PRODUCT,
            warehouse_id: WAREHOUSE,
            received,
            expiry,
            quantity,
            locked: Decimal::ZERO,
            inspection: InspectionStatus::NotRequired,
        }
    }
}

pub async fn seed_lot(db: &DatabaseConnection, seed: LotSeed) -> lot::Model {
    let now = Utc::now();
    lot::ActiveModel {
        product_id: Set(seed.product_id),
        warehouse_id: Set(seed.warehouse_id),
        lot_number: Set(format!("LOT-{}", Uuid::new_v4().simple())),
        received_date: Set(seed.received),
        expiry_date: Set(seed.expiry),
        current_quantity: Set(seed.quantity),
        locked_quantity: Set(seed.locked),
        status: Set(LotStatus::Active),
        inspection_status: Set(seed.inspection),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed lot")
}

/// Seeds an order with one line per `(product_id, quantity, unit)`.
pub async fn seed_order(
    db: &DatabaseConnection,
    demand_type: SourceType,
    ship_date: NaiveDate,
    lines: &[(i64, Decimal, &str)],
) -> (demand_order::Model, Vec<demand_line::Model>) {
    let now = Utc::now();
    let order = demand_order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(format!("SO-{}", &Uuid::new_v4().simple().to_string()[..8])),
        demand_type: Set(demand_type),
        warehouse_id: Set(Some(WAREHOUSE)),
        ship_date: Set(ship_date),
        allocation_status: Set(AllocationStatus::Unallocated),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed order");

    let mut seeded = Vec::with_capacity(lines.len());
    for (idx, (product_id, quantity, unit)) in lines.iter().enumerate() {
        let line = demand_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            line_no: Set(idx as i32 + 1),
            product_id: Set(*product_id),
            warehouse_id: Set(None),
            quantity: Set(*quantity),
            unit: Set(unit.to_string()),
            internal_quantity: Set(None),
            allocation_status: Set(AllocationStatus::Unallocated),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed line");
        seeded.push(line);
    }
    (order, seeded)
}

/// Soft reservation placed directly, bypassing the orchestrator.
pub async fn seed_reservation(
    engine: &TestEngine,
    lot_id: i64,
    source_type: SourceType,
    quantity: Decimal,
    status: ReservationStatus,
) -> reservation::Model {
    engine
        .service
        .reservations()
        .create(
            lot_allocation::services::reservations::NewReservation {
                lot_id,
                source_type,
                source_id: Uuid::new_v4(),
                quantity,
                status,
            },
            "test",
        )
        .await
        .expect("seed reservation")
}
