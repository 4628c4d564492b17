//! Preview / commit orchestration.
//!
//! `preview` is read-only and lock-free. `commit` re-plans inside one transaction, locks every
//! touched lot in expiry, receipt, id order, re-validates availability under the lock and persists the
//! reservations; any failure rolls the whole order back.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AllocationConfig;
use crate::db::LockMode;
use crate::entities::demand_line::{self, Entity as DemandLine};
use crate::entities::demand_order::{self, Entity as DemandOrder};
use crate::entities::lot::{self, LotStatus};
use crate::entities::reservation::{self, ReservationStatus, SourceType};
use crate::errors::ServiceError;
use crate::events::{publish_all, Event, EventPublisher};
use crate::metrics::{record_commit_failure, ALLOCATION_COMMITS};
use crate::repositories::lot_candidate_repository::{
    available_quantity, find_candidates, AllocationCandidate, AllocationPolicyKind, CandidateQuery,
};
use crate::services::allocation_policy::{allocate, sort_candidates, LotAllocation};
use crate::services::demand_status;
use crate::services::erp_gateway::ErpGateway;
use crate::services::mapping_validator::MappingValidator;
use crate::services::preemption::{preempt, PreemptionRecord, PreemptionReport, Requester};
use crate::services::reservations::{
    insert_locked, lock_lot, lock_lots, BulkReleaseResult, NewReservation, ReservationService, SYSTEM_ACTOR,
};
use crate::services::unit_conversion::{load_item, to_internal_qty};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePlan {
    pub line_id: Uuid,
    pub line_no: i32,
    pub product_id: i64,
    pub warehouse_id: Option<i64>,
    /// Requirement in the item's internal unit.
    pub required_qty: Decimal,
    pub allocations: Vec<LotAllocation>,
    pub shortage: Decimal,
}

/// Read-only allocation proposal for one demand order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub order_id: Uuid,
    pub source_type: SourceType,
    pub ship_date: NaiveDate,
    pub policy: AllocationPolicyKind,
    pub lines: Vec<LinePlan>,
    /// Every lot the plan touches, in policy order.
    pub lots: Vec<AllocationCandidate>,
}

impl AllocationPlan {
    pub fn total_shortage(&self) -> Decimal {
        self.lines.iter().map(|l| l.shortage).sum()
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.total_shortage().is_zero()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOptions {
    /// Register each created reservation with the ERP after the commit.
    pub confirm: bool,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShortage {
    pub line_id: Uuid,
    pub product_id: i64,
    pub shortage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub reservation_id: Uuid,
    pub confirmed: bool,
    pub document_no: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub order_id: Uuid,
    pub reservations: Vec<reservation::Model>,
    pub shortages: Vec<LineShortage>,
    pub preemptions: Vec<PreemptionRecord>,
    pub confirmations: Vec<ConfirmationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub reservation: reservation::Model,
    pub preemption: PreemptionReport,
}

fn commit_error(
    lot: &lot::Model,
    required: Decimal,
    available: Decimal,
    ship_date: NaiveDate,
    reason: impl Into<String>,
) -> ServiceError {
    ServiceError::AllocationCommit {
        lot_id: lot.id,
        required,
        available,
        ship_date,
        warehouse_id: lot.warehouse_id,
        reason: reason.into(),
    }
}

async fn load_order<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
) -> Result<demand_order::Model, ServiceError> {
    DemandOrder::find_by_id(order_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Demand order {} not found", order_id)))
}

/// Engine entry point: preview, commit, direct lot reservation and release.
#[derive(Clone)]
pub struct AllocationService {
    db: Arc<DatabaseConnection>,
    config: AllocationConfig,
    validator: MappingValidator,
    reservations: ReservationService,
    publisher: Arc<dyn EventPublisher>,
}

impl AllocationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AllocationConfig,
        gateway: Arc<dyn ErpGateway>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let reservations =
            ReservationService::new(db.clone(), &config, gateway, publisher.clone());
        Self {
            db,
            validator: MappingValidator::new(config.require_external_mapping),
            config,
            reservations,
            publisher,
        }
    }

    pub fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    /// Plans every line of `order`. Preview scans with `LockMode::None`; commit scans with
    /// `LockMode::SkipLocked` so lots another committer holds drop out instead of blocking.
    async fn build_plan<C: ConnectionTrait>(
        &self,
        db: &C,
        order: &demand_order::Model,
        lock_mode: LockMode,
    ) -> Result<AllocationPlan, ServiceError> {
        let policy = self.config.default_policy;
        let lines = DemandLine::find()
            .filter(demand_line::Column::OrderId.eq(order.id))
            .order_by_asc(demand_line::Column::LineNo)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        // Quantity already promised to earlier lines of this order, per lot.
        let mut planned: HashMap<i64, Decimal> = HashMap::new();
        let mut touched: HashMap<i64, AllocationCandidate> = HashMap::new();
        let mut line_plans = Vec::with_capacity(lines.len());

        for line in lines {
            let item = load_item(db, line.product_id).await?;
            let required = to_internal_qty(db, &item, line.quantity, &line.unit).await?;
            let warehouse_id = line.warehouse_id.or(order.warehouse_id);

            let query = CandidateQuery::new(line.product_id, order.ship_date)
                .policy(policy)
                .warehouse(warehouse_id)
                .lock_mode(lock_mode);
            let mut candidates = find_candidates(db, &query).await?;
            for candidate in candidates.iter_mut() {
                if let Some(used) = planned.get(&candidate.lot_id) {
                    candidate.available_qty -= *used;
                }
            }
            candidates.retain(|c| c.available_qty > Decimal::ZERO);

            let outcome = allocate(required, &candidates, policy);
            for allocation in &outcome.allocations {
                *planned.entry(allocation.lot_id).or_insert(Decimal::ZERO) += allocation.quantity;
                if let Some(candidate) = candidates.iter().find(|c| c.lot_id == allocation.lot_id) {
                    touched
                        .entry(allocation.lot_id)
                        .or_insert_with(|| candidate.clone());
                }
            }

            line_plans.push(LinePlan {
                line_id: line.id,
                line_no: line.line_no,
                product_id: line.product_id,
                warehouse_id,
                required_qty: required,
                allocations: outcome.allocations,
                shortage: outcome.shortage,
            });
        }

        let mut lots: Vec<AllocationCandidate> = touched.into_values().collect();
        sort_candidates(&mut lots, policy);

        Ok(AllocationPlan {
            order_id: order.id,
            source_type: order.demand_type,
            ship_date: order.ship_date,
            policy,
            lines: line_plans,
            lots,
        })
    }

    /// Proposes lots for every line of the order. Takes no locks and writes nothing.
    #[instrument(skip(self))]
    pub async fn preview(&self, order_id: Uuid) -> Result<AllocationPlan, ServiceError> {
        let db = &*self.db;
        let order = load_order(db, order_id).await?;
        let plan = self.build_plan(db, &order, LockMode::None).await?;
        info!(
            order_id = %order_id,
            lines = plan.lines.len(),
            shortage = %plan.total_shortage(),
            "Allocation preview built"
        );
        Ok(plan)
    }

    /// Re-plans the order and persists the reservations, all or nothing.
    #[instrument(skip(self, options))]
    pub async fn commit(
        &self,
        order_id: Uuid,
        options: CommitOptions,
    ) -> Result<CommitResult, ServiceError> {
        let result = self.commit_inner(order_id, None, &options).await;
        self.finish_commit(result, &options).await
    }

    /// Persists a plan obtained from [`preview`](Self::preview). Availability is re-checked under
    /// the lot locks, so a plan that went stale fails with [`ServiceError::AllocationCommit`].
    #[instrument(skip(self, plan, options), fields(order_id = %plan.order_id))]
    pub async fn commit_plan(
        &self,
        plan: &AllocationPlan,
        options: CommitOptions,
    ) -> Result<CommitResult, ServiceError> {
        let result = self.commit_inner(plan.order_id, Some(plan), &options).await;
        self.finish_commit(result, &options).await
    }

    async fn commit_inner(
        &self,
        order_id: Uuid,
        prepared: Option<&AllocationPlan>,
        options: &CommitOptions,
    ) -> Result<(CommitResult, Vec<PreemptionReport>, Vec<Event>), ServiceError> {
        let actor = options.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let order = load_order(&txn, order_id).await?;
        let plan = match prepared {
            Some(plan) => plan.clone(),
            None => self.build_plan(&txn, &order, LockMode::SkipLocked).await?,
        };

        let mut locked: HashMap<i64, lot::Model> = HashMap::with_capacity(plan.lots.len());
        let lot_ids: Vec<i64> = plan.lots.iter().map(|c| c.lot_id).collect();
        for lot in lock_lots(&txn, &lot_ids).await? {
            if lot.status != LotStatus::Active || !lot.inspection_status.is_released() {
                let required = plan
                    .lines
                    .iter()
                    .flat_map(|l| l.allocations.iter())
                    .filter(|a| a.lot_id == lot.id)
                    .map(|a| a.quantity)
                    .sum();
                return Err(commit_error(
                    &lot,
                    required,
                    Decimal::ZERO,
                    order.ship_date,
                    format!("lot is not allocatable ({:?})", lot.status),
                ));
            }
            locked.insert(lot.id, lot);
        }

        let hard = order.demand_type.is_hard();
        // Lines of the order being committed never preempt one another.
        let order_sources: Vec<Uuid> = plan.lines.iter().map(|l| l.line_id).collect();
        let reason = format!("commit of order {}", order.order_number);
        let mut claimed: HashMap<i64, Decimal> = HashMap::new();
        let mut freed: HashMap<i64, Decimal> = HashMap::new();
        let mut created = Vec::new();
        let mut reports = Vec::new();
        let mut events = Vec::new();

        for line in &plan.lines {
            for allocation in &line.allocations {
                let lot = locked.get(&allocation.lot_id).ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "Lot {} missing from lock set",
                        allocation.lot_id
                    ))
                })?;

                let need = claimed.get(&lot.id).copied().unwrap_or(Decimal::ZERO)
                    + allocation.quantity;
                let available = available_quantity(&txn, lot).await?
                    + freed.get(&lot.id).copied().unwrap_or(Decimal::ZERO);

                if available + self.config.commit_epsilon < need {
                    if !(hard && self.config.enable_preemption) {
                        return Err(commit_error(
                            lot,
                            need,
                            available,
                            order.ship_date,
                            "insufficient quantity under lock",
                        ));
                    }
                    let requester = Requester {
                        source_type: order.demand_type,
                        source_id: line.line_id,
                    };
                    let report = preempt(
                        &txn,
                        lot.id,
                        requester,
                        &order_sources,
                        need - available,
                        actor,
                    )
                    .await?;
                    if !report.is_resolved() {
                        return Err(commit_error(
                            lot,
                            need,
                            available + report.freed,
                            order.ship_date,
                            "insufficient quantity under lock after preemption",
                        ));
                    }
                    *freed.entry(lot.id).or_insert(Decimal::ZERO) += report.freed;
                    events.extend(report.events(lot.id, line.line_id));
                    reports.push(report);
                }

                self.validator.validate_lot(&txn, lot).await?;

                let reservation = insert_locked(
                    &txn,
                    &NewReservation {
                        lot_id: lot.id,
                        source_type: order.demand_type,
                        source_id: line.line_id,
                        quantity: allocation.quantity,
                        status: self.config.initial_reservation_status(),
                    },
                    actor,
                    Some(&reason),
                )
                .await?;
                *claimed.entry(lot.id).or_insert(Decimal::ZERO) += allocation.quantity;
                created.push(reservation);
            }
            demand_status::recompute_for_source(&txn, line.line_id).await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        let shortages: Vec<LineShortage> = plan
            .lines
            .iter()
            .filter(|l| l.shortage > Decimal::ZERO)
            .map(|l| LineShortage {
                line_id: l.line_id,
                product_id: l.product_id,
                shortage: l.shortage,
            })
            .collect();

        events.push(Event::ReservationsCommitted {
            order_id,
            reservation_ids: created.iter().map(|r| r.id).collect(),
            shortage_lines: shortages.len(),
        });

        let result = CommitResult {
            order_id,
            preemptions: reports.iter().flat_map(|r| r.records.clone()).collect(),
            reservations: created,
            shortages,
            confirmations: Vec::new(),
        };
        Ok((result, reports, events))
    }

    async fn finish_commit(
        &self,
        outcome: Result<(CommitResult, Vec<PreemptionReport>, Vec<Event>), ServiceError>,
        options: &CommitOptions,
    ) -> Result<CommitResult, ServiceError> {
        let (mut result, reports, events) = match outcome {
            Ok(done) => done,
            Err(e) => {
                record_commit_failure(e.error_code());
                warn!(error = %e, "Allocation commit rolled back");
                return Err(e);
            }
        };

        ALLOCATION_COMMITS.inc();
        for report in &reports {
            report.record_metrics();
        }
        info!(
            order_id = %result.order_id,
            reservations = result.reservations.len(),
            shortage_lines = result.shortages.len(),
            preempted = result.preemptions.len(),
            "Allocation committed"
        );
        publish_all(self.publisher.as_ref(), events).await;

        if options.confirm {
            let actor = options.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
            for created in result.reservations.iter_mut() {
                if created.status == ReservationStatus::Temporary {
                    match self.reservations.activate(created.id, actor).await {
                        Ok(activated) => *created = activated,
                        Err(e) => {
                            result.confirmations.push(ConfirmationOutcome {
                                reservation_id: created.id,
                                confirmed: false,
                                document_no: None,
                                error: Some(e.to_string()),
                            });
                            continue;
                        }
                    }
                }
                let outcome = match self.reservations.confirm(created.id, actor).await {
                    Ok(confirmed) => {
                        let outcome = ConfirmationOutcome {
                            reservation_id: confirmed.id,
                            confirmed: true,
                            document_no: confirmed.sap_document_no.clone(),
                            error: None,
                        };
                        *created = confirmed;
                        outcome
                    }
                    Err(e) => ConfirmationOutcome {
                        reservation_id: created.id,
                        confirmed: false,
                        document_no: None,
                        error: Some(e.to_string()),
                    },
                };
                result.confirmations.push(outcome);
            }
        }

        Ok(result)
    }

    /// Reserves `quantity` on one specific lot for a demand source, preempting lower-priority
    /// soft holds when the source is hard demand and the lot is short.
    #[instrument(skip(self))]
    pub async fn reserve_on_lot(
        &self,
        lot_id: i64,
        source_type: SourceType,
        source_id: Uuid,
        quantity: Decimal,
        actor: &str,
    ) -> Result<ReserveOutcome, ServiceError> {
        let outcome = self
            .reserve_on_lot_inner(lot_id, source_type, source_id, quantity, actor)
            .await;
        let (outcome, events) = match outcome {
            Ok(done) => done,
            Err(e) => {
                record_commit_failure(e.error_code());
                warn!(lot_id, error = %e, "Lot reservation rolled back");
                return Err(e);
            }
        };

        outcome.preemption.record_metrics();
        info!(
            lot_id,
            reservation_id = %outcome.reservation.id,
            freed = %outcome.preemption.freed,
            "Reserved on lot"
        );
        publish_all(self.publisher.as_ref(), events).await;
        Ok(outcome)
    }

    async fn reserve_on_lot_inner(
        &self,
        lot_id: i64,
        source_type: SourceType,
        source_id: Uuid,
        quantity: Decimal,
        actor: &str,
    ) -> Result<(ReserveOutcome, Vec<Event>), ServiceError> {
        let today = Utc::now().date_naive();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let lot = lock_lot(&txn, lot_id).await?;
        if !lot.is_allocatable() {
            return Err(commit_error(
                &lot,
                quantity,
                Decimal::ZERO,
                today,
                format!("lot is not allocatable ({:?})", lot.status),
            ));
        }

        let available = available_quantity(&txn, &lot).await?;
        let mut preemption = PreemptionReport::default();
        let mut events = Vec::new();
        if available + self.config.commit_epsilon < quantity {
            if !(source_type.is_hard() && self.config.enable_preemption) {
                return Err(commit_error(
                    &lot,
                    quantity,
                    available,
                    today,
                    "insufficient quantity under lock",
                ));
            }
            let requester = Requester {
                source_type,
                source_id,
            };
            preemption =
                preempt(&txn, lot.id, requester, &[], quantity - available, actor).await?;
            if !preemption.is_resolved() {
                return Err(commit_error(
                    &lot,
                    quantity,
                    available + preemption.freed,
                    today,
                    "insufficient quantity under lock after preemption",
                ));
            }
            events.extend(preemption.events(lot.id, source_id));
        }

        self.validator.validate_lot(&txn, &lot).await?;
        let reservation = insert_locked(
            &txn,
            &NewReservation {
                lot_id,
                source_type,
                source_id,
                quantity,
                status: ReservationStatus::Active,
            },
            actor,
            None,
        )
        .await?;
        demand_status::recompute_for_source(&txn, source_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok((
            ReserveOutcome {
                reservation,
                preemption,
            },
            events,
        ))
    }

    pub async fn confirm(&self, id: Uuid, actor: &str) -> Result<reservation::Model, ServiceError> {
        self.reservations.confirm(id, actor).await
    }

    pub async fn release(
        &self,
        id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<reservation::Model, ServiceError> {
        self.reservations.release(id, actor, reason).await
    }

    pub async fn bulk_release(
        &self,
        ids: &[Uuid],
        actor: &str,
        reason: Option<&str>,
    ) -> BulkReleaseResult {
        self.reservations.bulk_release(ids, actor, reason).await
    }

    pub async fn release_for_source(
        &self,
        source_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        self.reservations
            .release_for_source(source_id, actor, reason)
            .await
    }
}
