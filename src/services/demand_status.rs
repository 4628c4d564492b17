use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::demand_line::{self, Entity as DemandLine};
use crate::entities::demand_order::{self, AllocationStatus, Entity as DemandOrder};
use crate::entities::reservation::{self, Entity as Reservation, ReservationStatus};
use crate::errors::ServiceError;
use crate::quantity::COMMIT_EPSILON;
use crate::services::unit_conversion::{load_item, to_internal_qty};

fn line_status(reserved: Decimal, required: Decimal) -> AllocationStatus {
    if reserved <= Decimal::ZERO {
        AllocationStatus::Unallocated
    } else if reserved + COMMIT_EPSILON >= required {
        AllocationStatus::Allocated
    } else {
        AllocationStatus::PartiallyAllocated
    }
}

fn order_status(lines: &[AllocationStatus]) -> AllocationStatus {
    if lines.is_empty() || lines.iter().all(|s| *s == AllocationStatus::Unallocated) {
        AllocationStatus::Unallocated
    } else if lines.iter().all(|s| *s == AllocationStatus::Allocated) {
        AllocationStatus::Allocated
    } else {
        AllocationStatus::PartiallyAllocated
    }
}

async fn line_required_qty<C: ConnectionTrait>(
    db: &C,
    line: &demand_line::Model,
) -> Result<Decimal, ServiceError> {
    let item = load_item(db, line.product_id).await?;
    to_internal_qty(db, &item, line.quantity, &line.unit).await
}

/// Recomputes the allocation status of the demand line identified by `source_id` and of its
/// order. Reservations whose source is not a demand line (manual holds, forecasts kept elsewhere)
/// have nothing to recompute.
pub async fn recompute_for_source<C: ConnectionTrait>(
    db: &C,
    source_id: Uuid,
) -> Result<(), ServiceError> {
    let Some(line) = DemandLine::find_by_id(source_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
    else {
        return Ok(());
    };

    let reserved: Decimal = Reservation::find()
        .filter(reservation::Column::SourceId.eq(line.id))
        .filter(reservation::Column::Status.ne(ReservationStatus::Released))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .iter()
        .map(|r| r.reserved_qty)
        .sum();

    let required = match line.internal_quantity {
        Some(required) => Some(required),
        None => match line_required_qty(db, &line).await {
            Ok(required) => Some(required),
            Err(e @ (ServiceError::Conversion { .. } | ServiceError::NotFound(_))) => {
                warn!(line_id = %line.id, error = %e, "Demand line quantity cannot be converted");
                None
            }
            Err(e) => return Err(e),
        },
    };
    let status = match required {
        Some(required) => line_status(reserved, required),
        None if reserved <= Decimal::ZERO => AllocationStatus::Unallocated,
        None => line.allocation_status,
    };

    let order_id = line.order_id;
    if line.allocation_status != status || line.internal_quantity != required {
        let mut active: demand_line::ActiveModel = line.into();
        active.allocation_status = Set(status);
        active.internal_quantity = Set(required);
        active.updated_at = Set(chrono::Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)?;
    }

    recompute_order(db, order_id).await?;
    debug!(line_id = %source_id, status = ?status, "Recomputed demand line allocation status");
    Ok(())
}

/// Aggregates line statuses onto the order header.
pub async fn recompute_order<C: ConnectionTrait>(db: &C, order_id: Uuid) -> Result<(), ServiceError> {
    let Some(order) = DemandOrder::find_by_id(order_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
    else {
        return Ok(());
    };

    let statuses: Vec<AllocationStatus> = DemandLine::find()
        .filter(demand_line::Column::OrderId.eq(order_id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|l| l.allocation_status)
        .collect();

    let status = order_status(&statuses);
    if order.allocation_status != status {
        let mut active: demand_order::ActiveModel = order.into();
        active.allocation_status = Set(status);
        active.updated_at = Set(chrono::Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)?;
    }
    Ok(())
}
