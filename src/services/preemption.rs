//! Eviction of soft reservations to make room for hard demand.
//!
//! Runs inside the caller's transaction while the caller holds the lot lock. CONFIRMED
//! reservations are never touched.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::reservation::{self, Entity as Reservation, ReservationStatus, SourceType};
use crate::entities::reservation_history::HistoryOperation;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::metrics::RESERVATIONS_PREEMPTED;
use crate::services::demand_status;
use crate::services::reservations::{reduce_locked, release_locked};

/// Demand asking for room on a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub source_type: SourceType,
    pub source_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionRecord {
    pub reservation_id: Uuid,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub freed: Decimal,
    /// Reserved quantity left on the donor; zero when it was released outright.
    pub remaining_qty: Decimal,
}

impl PreemptionRecord {
    pub fn fully_released(&self) -> bool {
        self.remaining_qty.is_zero()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionReport {
    pub freed: Decimal,
    pub remaining_shortage: Decimal,
    pub records: Vec<PreemptionRecord>,
}

impl PreemptionReport {
    pub fn is_resolved(&self) -> bool {
        self.remaining_shortage <= Decimal::ZERO
    }

    pub fn events(&self, lot_id: i64, preempted_by: Uuid) -> Vec<Event> {
        self.records
            .iter()
            .map(|r| Event::ReservationPreempted {
                reservation_id: r.reservation_id,
                lot_id,
                freed: r.freed,
                remaining: r.remaining_qty,
                preempted_by,
            })
            .collect()
    }

    /// Counts the touched donors. Call once the surrounding transaction has committed.
    pub fn record_metrics(&self) {
        for record in &self.records {
            let outcome = if record.fully_released() {
                "released"
            } else {
                "reduced"
            };
            RESERVATIONS_PREEMPTED.with_label_values(&[outcome]).inc();
        }
    }
}

/// Soft holds on `lot_id` that may be evicted for `requester`, in eviction order: lowest tier
/// first, then oldest first.
///
/// Holds of the requester itself and of any source in `protected` are never donors.
pub async fn find_donors<C: ConnectionTrait>(
    db: &C,
    lot_id: i64,
    requester: Requester,
    protected: &[Uuid],
) -> Result<Vec<reservation::Model>, ServiceError> {
    let mut query = Reservation::find()
        .filter(reservation::Column::LotId.eq(lot_id))
        .filter(
            reservation::Column::Status
                .is_in([ReservationStatus::Active, ReservationStatus::Temporary]),
        )
        .filter(reservation::Column::SourceId.ne(requester.source_id));
    if !protected.is_empty() {
        query = query.filter(reservation::Column::SourceId.is_not_in(protected.iter().copied()));
    }
    let mut donors = query.all(db).await.map_err(ServiceError::db_error)?;

    donors.sort_by(|a, b| {
        a.source_type
            .preemption_tier()
            .cmp(&b.source_type.preemption_tier())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(donors)
}

/// Frees up to `shortage` on `lot_id` by releasing or shrinking donors.
///
/// A donor no larger than the remaining shortage is released whole; the first larger donor is
/// reduced by exactly the remaining shortage and the walk stops there. Soft demand never preempts.
#[instrument(skip(db, protected), fields(requester_id = %requester.source_id))]
pub async fn preempt<C: ConnectionTrait>(
    db: &C,
    lot_id: i64,
    requester: Requester,
    protected: &[Uuid],
    shortage: Decimal,
    actor: &str,
) -> Result<PreemptionReport, ServiceError> {
    let mut report = PreemptionReport {
        freed: Decimal::ZERO,
        remaining_shortage: shortage.max(Decimal::ZERO),
        records: Vec::new(),
    };
    if report.is_resolved() || !requester.source_type.is_hard() {
        return Ok(report);
    }

    let reason = format!(
        "preempted by {} {}",
        requester.source_type, requester.source_id
    );
    let mut touched_sources = BTreeSet::new();

    for donor in find_donors(db, lot_id, requester, protected).await? {
        if report.is_resolved() {
            break;
        }
        let remaining = report.remaining_shortage;
        let donor_qty = donor.reserved_qty;
        touched_sources.insert(donor.source_id);

        let record = if donor_qty <= remaining {
            let released =
                release_locked(db, donor, HistoryOperation::Preempt, actor, Some(&reason)).await?;
            PreemptionRecord {
                reservation_id: released.id,
                source_type: released.source_type,
                source_id: released.source_id,
                freed: donor_qty,
                remaining_qty: Decimal::ZERO,
            }
        } else {
            let reduced =
                reduce_locked(db, donor, donor_qty - remaining, actor, Some(&reason)).await?;
            PreemptionRecord {
                reservation_id: reduced.id,
                source_type: reduced.source_type,
                source_id: reduced.source_id,
                freed: remaining,
                remaining_qty: reduced.reserved_qty,
            }
        };

        report.freed += record.freed;
        report.remaining_shortage -= record.freed;
        report.records.push(record);
    }

    for source_id in touched_sources {
        demand_status::recompute_for_source(db, source_id).await?;
    }

    info!(
        lot_id,
        freed = %report.freed,
        remaining_shortage = %report.remaining_shortage,
        donors = report.records.len(),
        "Preemption finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn report_events_carry_requester() {
        let requester = Uuid::new_v4();
        let donor = Uuid::new_v4();
        let report = PreemptionReport {
            freed: dec!(30),
            remaining_shortage: Decimal::ZERO,
            records: vec![PreemptionRecord {
                reservation_id: donor,
                source_type: SourceType::Forecast,
                source_id: Uuid::new_v4(),
                freed: dec!(30),
                remaining_qty: dec!(10),
            }],
        };
        assert!(report.is_resolved());
        assert!(!report.records[0].fully_released());
        assert_eq!(
            report.events(7, requester),
            vec![Event::ReservationPreempted {
                reservation_id: donor,
                lot_id: 7,
                freed: dec!(30),
                remaining: dec!(10),
                preempted_by: requester,
            }]
        );
    }
}
