use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::db::{with_lock, LockMode};
use crate::entities::lot::{self, Entity as Lot, InspectionStatus, LotStatus};
use crate::entities::reservation::{self, Entity as Reservation, ReservationStatus};
use crate::errors::ServiceError;
use crate::services::allocation_policy::sort_candidates;

/// Ordering rule applied to candidate lots.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AllocationPolicyKind {
    /// First-expired-first-out: expiry ascending (undated last), then receipt, then id.
    #[default]
    Fefo,
    /// First-in-first-out: receipt ascending, then id.
    Fifo,
}

/// Transient projection of a lot used during policy evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCandidate {
    pub lot_id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub available_qty: Decimal,
    pub receipt_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub status: LotStatus,
}

#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub product_id: i64,
    pub policy: AllocationPolicyKind,
    pub lock_mode: LockMode,
    pub warehouse_id: Option<i64>,
    /// Reference date for expiry filtering; lots expiring before it are dropped.
    pub ship_date: NaiveDate,
    pub exclude_expired: bool,
    pub exclude_locked: bool,
    pub min_available_qty: Decimal,
}

impl CandidateQuery {
    pub fn new(product_id: i64, ship_date: NaiveDate) -> Self {
        Self {
            product_id,
            policy: AllocationPolicyKind::Fefo,
            lock_mode: LockMode::None,
            warehouse_id: None,
            ship_date,
            exclude_expired: true,
            exclude_locked: true,
            min_available_qty: Decimal::ZERO,
        }
    }

    pub fn policy(mut self, policy: AllocationPolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn warehouse(mut self, warehouse_id: Option<i64>) -> Self {
        self.warehouse_id = warehouse_id;
        self
    }

    pub fn lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }
}

/// Sum of CONFIRMED reservations per lot. Only confirmed earmarks reduce availability.
pub async fn confirmed_totals<C: ConnectionTrait>(
    db: &C,
    lot_ids: &[i64],
) -> Result<HashMap<i64, Decimal>, ServiceError> {
    let mut totals: HashMap<i64, Decimal> = HashMap::new();
    if lot_ids.is_empty() {
        return Ok(totals);
    }

    let confirmed = Reservation::find()
        .filter(reservation::Column::LotId.is_in(lot_ids.iter().copied()))
        .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    for r in confirmed {
        *totals.entry(r.lot_id).or_insert(Decimal::ZERO) += r.reserved_qty;
    }
    Ok(totals)
}

/// Available quantity of a single lot: current - locked - confirmed.
pub async fn available_quantity<C: ConnectionTrait>(
    db: &C,
    lot: &lot::Model,
) -> Result<Decimal, ServiceError> {
    let confirmed = confirmed_totals(db, &[lot.id]).await?;
    Ok(lot.unlocked_quantity() - confirmed.get(&lot.id).copied().unwrap_or(Decimal::ZERO))
}

/// Returns eligible lots for a product, sorted by `query.policy`.
///
/// Only active lots whose inspection is `not_required` or `passed` are considered. Lots with no
/// expiry date never expire.
#[instrument(skip(db), fields(product_id = query.product_id))]
pub async fn find_candidates<C: ConnectionTrait>(
    db: &C,
    query: &CandidateQuery,
) -> Result<Vec<AllocationCandidate>, ServiceError> {
    let mut select = Lot::find()
        .filter(lot::Column::ProductId.eq(query.product_id))
        .filter(lot::Column::Status.eq(LotStatus::Active))
        .filter(
            lot::Column::InspectionStatus
                .is_in([InspectionStatus::NotRequired, InspectionStatus::Passed]),
        );

    if let Some(warehouse_id) = query.warehouse_id {
        select = select.filter(lot::Column::WarehouseId.eq(warehouse_id));
    }

    if query.exclude_expired {
        select = select.filter(
            Condition::any()
                .add(lot::Column::ExpiryDate.is_null())
                .add(lot::Column::ExpiryDate.gte(query.ship_date)),
        );
    }

    let select = select
        .order_by_asc(lot::Column::ReceivedDate)
        .order_by_asc(lot::Column::Id);

    let lots = with_lock(select, query.lock_mode, db.get_database_backend())
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    let lot_ids: Vec<i64> = lots.iter().map(|l| l.id).collect();
    let confirmed = confirmed_totals(db, &lot_ids).await?;

    let mut candidates: Vec<AllocationCandidate> = lots
        .into_iter()
        .filter_map(|l| {
            let held = if query.exclude_locked {
                l.locked_quantity
            } else {
                Decimal::ZERO
            };
            let available = l.current_quantity
                - held
                - confirmed.get(&l.id).copied().unwrap_or(Decimal::ZERO);
            if available <= Decimal::ZERO || available < query.min_available_qty {
                return None;
            }
            Some(AllocationCandidate {
                lot_id: l.id,
                product_id: l.product_id,
                warehouse_id: l.warehouse_id,
                available_qty: available,
                receipt_date: l.received_date,
                expiry_date: l.expiry_date,
                status: l.status,
            })
        })
        .collect();

    sort_candidates(&mut candidates, query.policy);

    debug!(
        candidates = candidates.len(),
        policy = ?query.policy,
        lock_mode = ?query.lock_mode,
        "Resolved allocation candidates"
    );
    Ok(candidates)
}
