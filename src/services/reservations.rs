//! Reservation lifecycle manager.
//!
//! States: TEMPORARY -> ACTIVE -> CONFIRMED, and any non-released state -> RELEASED.
//! Every mutation happens under the parent lot's row lock and appends one history row.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AllocationConfig;
use crate::db::{with_lock, LockMode};
use crate::entities::lot::{self, Entity as Lot, LotStatus};
use crate::entities::reservation::{self, Entity as Reservation, ReservationStatus, SourceType};
use crate::entities::reservation_history::{self, Entity as ReservationHistory, HistoryOperation};
use crate::errors::ServiceError;
use crate::events::{publish_all, Event, EventPublisher};
use crate::metrics::{GATEWAY_REGISTRATIONS, RESERVATIONS_RELEASED};
use crate::repositories::lot_candidate_repository::available_quantity;
use crate::services::demand_status;
use crate::services::erp_gateway::ErpGateway;
use crate::services::mapping_validator::MappingValidator;

/// Actor recorded in history when the engine itself performs a transition.
pub const SYSTEM_ACTOR: &str = "allocation-engine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub lot_id: i64,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub quantity: Decimal,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReleaseResult {
    pub released: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Loads the lot with `SELECT ... FOR UPDATE`, waiting for a concurrent holder.
pub async fn lock_lot<C: ConnectionTrait>(db: &C, lot_id: i64) -> Result<lot::Model, ServiceError> {
    with_lock(Lot::find_by_id(lot_id), LockMode::Wait, db.get_database_backend())
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", lot_id)))
}

/// Locks every lot in `lot_ids`, one at a time in [`lot::Model::lock_key`] order.
///
/// Writers touching several lots go through here so that two of them never wait on each other's
/// locks in opposite order.
pub async fn lock_lots<C: ConnectionTrait>(
    db: &C,
    lot_ids: &[i64],
) -> Result<Vec<lot::Model>, ServiceError> {
    let mut ids = lot_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut lots = Lot::find()
        .filter(lot::Column::Id.is_in(ids.iter().copied()))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    if let Some(missing) = ids.iter().find(|id| !lots.iter().any(|l| l.id == **id)) {
        return Err(ServiceError::NotFound(format!("Lot {} not found", missing)));
    }
    lots.sort_by_key(|l| l.lock_key());

    let mut locked = Vec::with_capacity(lots.len());
    for lot in lots {
        locked.push(lock_lot(db, lot.id).await?);
    }
    Ok(locked)
}

async fn find_reservation<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<reservation::Model, ServiceError> {
    Reservation::find_by_id(id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or(ServiceError::AllocationNotFound(id))
}

/// Appends one audit row describing the move from `before` to `after`.
pub(crate) async fn write_history<C: ConnectionTrait>(
    db: &C,
    operation: HistoryOperation,
    before: Option<&reservation::Model>,
    after: &reservation::Model,
    actor: &str,
    reason: Option<&str>,
) -> Result<(), ServiceError> {
    let row = reservation_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        reservation_id: Set(after.id),
        lot_id: Set(after.lot_id),
        operation: Set(operation),
        old_status: Set(before.map(|b| b.status)),
        new_status: Set(Some(after.status)),
        old_quantity: Set(before.map(|b| b.reserved_qty)),
        new_quantity: Set(Some(after.reserved_qty)),
        old_sap_document_no: Set(before.and_then(|b| b.sap_document_no.clone())),
        new_sap_document_no: Set(after.sap_document_no.clone()),
        changed_by: Set(actor.to_string()),
        changed_at: Set(Utc::now()),
        reason: Set(reason.map(str::to_string)),
    };
    row.insert(db).await.map_err(ServiceError::db_error)?;
    Ok(())
}

/// Inserts a reservation and its INSERT history row. The caller holds the lot lock.
pub(crate) async fn insert_locked<C: ConnectionTrait>(
    db: &C,
    new: &NewReservation,
    actor: &str,
    reason: Option<&str>,
) -> Result<reservation::Model, ServiceError> {
    if new.quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Reserved quantity must be positive, got {}",
            new.quantity
        )));
    }
    if !matches!(
        new.status,
        ReservationStatus::Active | ReservationStatus::Temporary
    ) {
        return Err(ServiceError::InvalidOperation(format!(
            "Reservations are created ACTIVE or TEMPORARY, not {}",
            new.status
        )));
    }

    let model = reservation::ActiveModel {
        id: Set(Uuid::new_v4()),
        lot_id: Set(new.lot_id),
        source_type: Set(new.source_type),
        source_id: Set(new.source_id),
        reserved_qty: Set(new.quantity),
        status: Set(new.status),
        sap_document_no: Set(None),
        sap_registered_at: Set(None),
        confirmed_at: Set(None),
        released_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)?;

    write_history(db, HistoryOperation::Insert, None, &model, actor, reason).await?;
    Ok(model)
}

/// Moves a reservation to RELEASED. The caller holds the lot lock and has checked the status.
pub(crate) async fn release_locked<C: ConnectionTrait>(
    db: &C,
    current: reservation::Model,
    operation: HistoryOperation,
    actor: &str,
    reason: Option<&str>,
) -> Result<reservation::Model, ServiceError> {
    let mut active: reservation::ActiveModel = current.clone().into();
    active.status = Set(ReservationStatus::Released);
    active.released_at = Set(Some(Utc::now()));
    let updated = active.update(db).await.map_err(ServiceError::db_error)?;

    write_history(db, operation, Some(&current), &updated, actor, reason).await?;
    Ok(updated)
}

/// Shrinks a soft reservation to `new_qty`. The caller holds the lot lock.
pub(crate) async fn reduce_locked<C: ConnectionTrait>(
    db: &C,
    current: reservation::Model,
    new_qty: Decimal,
    actor: &str,
    reason: Option<&str>,
) -> Result<reservation::Model, ServiceError> {
    let mut active: reservation::ActiveModel = current.clone().into();
    active.reserved_qty = Set(new_qty);
    let updated = active.update(db).await.map_err(ServiceError::db_error)?;

    write_history(db, HistoryOperation::Preempt, Some(&current), &updated, actor, reason).await?;
    Ok(updated)
}

/// Service owning every write to `lot_reservations`.
#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn ErpGateway>,
    publisher: Arc<dyn EventPublisher>,
    validator: MappingValidator,
    epsilon: Decimal,
}

impl ReservationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AllocationConfig,
        gateway: Arc<dyn ErpGateway>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            db,
            gateway,
            publisher,
            validator: MappingValidator::new(config.require_external_mapping),
            epsilon: config.commit_epsilon,
        }
    }

    /// Creates a reservation on an allocatable lot.
    #[instrument(skip(self, new), fields(lot_id = new.lot_id, source_id = %new.source_id))]
    pub async fn create(
        &self,
        new: NewReservation,
        actor: &str,
    ) -> Result<reservation::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let lot = lock_lot(&txn, new.lot_id).await?;
        if !lot.is_allocatable() {
            return Err(ServiceError::InvalidOperation(format!(
                "Lot {} is not allocatable (status {:?}, inspection {:?})",
                lot.id, lot.status, lot.inspection_status
            )));
        }
        self.validator.validate_lot(&txn, &lot).await?;

        let created = insert_locked(&txn, &new, actor, None).await?;
        demand_status::recompute_for_source(&txn, created.source_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(reservation_id = %created.id, status = %created.status, "Reservation created");
        Ok(created)
    }

    /// Promotes a TEMPORARY reservation to ACTIVE. Already ACTIVE is a no-op.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: Uuid, actor: &str) -> Result<reservation::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let current = find_reservation(&txn, id).await?;
        lock_lot(&txn, current.lot_id).await?;
        let current = find_reservation(&txn, id).await?;

        match current.status {
            ReservationStatus::Active => return Ok(current),
            ReservationStatus::Temporary => {}
            other => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Cannot activate reservation {} in status {}",
                    id, other
                )))
            }
        }

        let mut active: reservation::ActiveModel = current.clone().into();
        active.status = Set(ReservationStatus::Active);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        write_history(&txn, HistoryOperation::Activate, Some(&current), &updated, actor, None).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(reservation_id = %id, "Reservation activated");
        Ok(updated)
    }

    /// Registers the reservation with the ERP and marks it CONFIRMED.
    ///
    /// Already CONFIRMED is a no-op that writes nothing. A failed registration rolls back,
    /// leaves the reservation ACTIVE and returns [`ServiceError::GatewayRegistration`].
    #[instrument(skip(self))]
    pub async fn confirm(&self, id: Uuid, actor: &str) -> Result<reservation::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let current = find_reservation(&txn, id).await?;
        if current.status == ReservationStatus::Confirmed {
            return Ok(current);
        }
        let lot = lock_lot(&txn, current.lot_id).await?;
        let current = find_reservation(&txn, id).await?;

        if current.status == ReservationStatus::Confirmed {
            return Ok(current);
        }
        if !current.status.can_transition_to(ReservationStatus::Confirmed) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot confirm reservation {} in status {}",
                id, current.status
            )));
        }

        let available = available_quantity(&txn, &lot).await?;
        if lot.status != LotStatus::Active || available + self.epsilon < current.reserved_qty {
            return Err(ServiceError::AllocationCommit {
                lot_id: lot.id,
                required: current.reserved_qty,
                available,
                ship_date: Utc::now().date_naive(),
                warehouse_id: lot.warehouse_id,
                reason: if lot.status != LotStatus::Active {
                    format!("lot is {:?}", lot.status)
                } else {
                    "confirmed quantity would exceed stock".to_string()
                },
            });
        }
        self.validator.validate_lot(&txn, &lot).await?;

        let result = self.gateway.register_allocation(&current).await;
        if !result.success {
            txn.rollback().await.map_err(ServiceError::db_error)?;
            GATEWAY_REGISTRATIONS.with_label_values(&["failure"]).inc();

            let message = result
                .error_message
                .unwrap_or_else(|| "unknown ERP error".to_string());
            warn!(
                reservation_id = %id,
                gateway = self.gateway.name(),
                error = %message,
                "ERP registration failed; reservation stays ACTIVE"
            );
            publish_all(
                self.publisher.as_ref(),
                vec![Event::GatewayRegistrationFailed {
                    reservation_id: id,
                    message: message.clone(),
                    at: Utc::now(),
                }],
            )
            .await;
            return Err(ServiceError::GatewayRegistration {
                reservation_id: id,
                message,
            });
        }

        let now = Utc::now();
        let mut active: reservation::ActiveModel = current.clone().into();
        active.status = Set(ReservationStatus::Confirmed);
        active.sap_document_no = Set(result.document_no.clone());
        active.sap_registered_at = Set(Some(result.registered_at.unwrap_or(now)));
        active.confirmed_at = Set(Some(now));
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        write_history(&txn, HistoryOperation::Confirm, Some(&current), &updated, actor, None).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        GATEWAY_REGISTRATIONS.with_label_values(&["success"]).inc();
        info!(
            reservation_id = %id,
            document_no = ?updated.sap_document_no,
            "Reservation confirmed"
        );

        publish_all(
            self.publisher.as_ref(),
            vec![Event::ReservationConfirmed {
                reservation_id: id,
                lot_id: updated.lot_id,
                sap_document_no: updated.sap_document_no.clone(),
            }],
        )
        .await;
        Ok(updated)
    }

    /// Releases a reservation. Releasing an already RELEASED reservation is a silent no-op.
    #[instrument(skip(self, reason))]
    pub async fn release(
        &self,
        id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<reservation::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let current = find_reservation(&txn, id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        lock_lot(&txn, current.lot_id).await?;
        let current = find_reservation(&txn, id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let released =
            release_locked(&txn, current, HistoryOperation::Release, actor, reason).await?;
        demand_status::recompute_for_source(&txn, released.source_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        RESERVATIONS_RELEASED.inc();
        info!(reservation_id = %id, lot_id = released.lot_id, "Reservation released");
        publish_all(
            self.publisher.as_ref(),
            vec![Event::ReservationReleased {
                reservation_id: id,
                lot_id: released.lot_id,
                quantity: released.reserved_qty,
            }],
        )
        .await;
        Ok(released)
    }

    /// Best-effort release of many reservations; one failure does not stop the rest.
    #[instrument(skip(self, ids, reason), fields(count = ids.len()))]
    pub async fn bulk_release(
        &self,
        ids: &[Uuid],
        actor: &str,
        reason: Option<&str>,
    ) -> BulkReleaseResult {
        let mut result = BulkReleaseResult::default();
        for id in ids {
            match self.release(*id, actor, reason).await {
                Ok(_) => result.released.push(*id),
                Err(e) => {
                    warn!(reservation_id = %id, error = %e, "Bulk release skipped reservation");
                    result.failed.push(*id);
                }
            }
        }
        result
    }

    /// Releases every non-released reservation of one demand source in a single transaction.
    #[instrument(skip(self, reason))]
    pub async fn release_for_source(
        &self,
        source_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let open = Reservation::find()
            .filter(reservation::Column::SourceId.eq(source_id))
            .filter(reservation::Column::Status.ne(ReservationStatus::Released))
            .order_by_asc(reservation::Column::LotId)
            .order_by_asc(reservation::Column::CreatedAt)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let lot_ids: Vec<i64> = open.iter().map(|r| r.lot_id).collect();
        lock_lots(&txn, &lot_ids).await?;

        let mut released = Vec::with_capacity(open.len());
        let mut events = Vec::with_capacity(open.len());
        for candidate in open {
            let current = find_reservation(&txn, candidate.id).await?;
            if current.status.is_terminal() {
                continue;
            }
            let done =
                release_locked(&txn, current, HistoryOperation::Release, actor, reason).await?;
            events.push(Event::ReservationReleased {
                reservation_id: done.id,
                lot_id: done.lot_id,
                quantity: done.reserved_qty,
            });
            released.push(done.id);
        }

        demand_status::recompute_for_source(&txn, source_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        RESERVATIONS_RELEASED.inc_by(released.len() as u64);
        info!(source_id = %source_id, released = released.len(), "Released reservations for source");
        publish_all(self.publisher.as_ref(), events).await;
        Ok(released)
    }

    pub async fn get_reservation(&self, id: Uuid) -> Result<reservation::Model, ServiceError> {
        find_reservation(&*self.db, id).await
    }

    pub async fn list_for_source(
        &self,
        source_id: Uuid,
    ) -> Result<Vec<reservation::Model>, ServiceError> {
        Reservation::find()
            .filter(reservation::Column::SourceId.eq(source_id))
            .order_by_asc(reservation::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Audit trail of one reservation, oldest first.
    pub async fn history_for(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<reservation_history::Model>, ServiceError> {
        ReservationHistory::find()
            .filter(reservation_history::Column::ReservationId.eq(reservation_id))
            .order_by_asc(reservation_history::Column::ChangedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}
