use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// Missing or malformed unit mapping. A data-setup defect; never retried.
    #[error("No conversion factor for product {product_id} from unit '{unit}'")]
    Conversion { product_id: i64, unit: String },

    /// The reservation id does not exist. Distinct from the "already released" no-op.
    #[error("Reservation {0} not found")]
    AllocationNotFound(Uuid),

    #[error(
        "Allocation commit failed on lot {lot_id}: {reason} (required {required}, available {available}, ship date {ship_date}, warehouse {warehouse_id})"
    )]
    AllocationCommit {
        lot_id: i64,
        required: Decimal,
        available: Decimal,
        ship_date: NaiveDate,
        warehouse_id: i64,
        reason: String,
    },

    #[error("Lot {lot_id} carries product {product_id} ({item_code}) with no external item mapping")]
    UnmappedItem {
        lot_id: i64,
        product_id: i64,
        item_code: String,
    },

    /// The ERP rejected or failed the registration. Stock stays earmarked (ACTIVE) but unregistered.
    #[error("ERP registration failed for reservation {reservation_id}: {message}")]
    GatewayRegistration { reservation_id: Uuid, message: String },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Stable machine-readable code for each variant.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "resource_not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
            Self::Conversion { .. } => "conversion_error",
            Self::AllocationNotFound(_) => "allocation_not_found",
            Self::AllocationCommit { .. } => "allocation_commit_error",
            Self::UnmappedItem { .. } => "unmapped_item",
            Self::GatewayRegistration { .. } => "gateway_registration_failed",
            Self::EventError(_) => "event_error",
        }
    }

    /// Business errors (insufficient stock, unmapped item, missing conversion) are never retried.
    /// Only the external registration and connection-level database failures may succeed on a later call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GatewayRegistration { .. } => true,
            Self::DatabaseError(DbErr::Conn(_)) | Self::DatabaseError(DbErr::ConnectionAcquire(_)) => {
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn commit_error_message_carries_context() {
        let err = ServiceError::AllocationCommit {
            lot_id: 7,
            required: dec!(80),
            available: dec!(50),
            ship_date: NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
            warehouse_id: 3,
            reason: "insufficient quantity under lock".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("lot 7"));
        assert!(msg.contains("required 80"));
        assert!(msg.contains("available 50"));
        assert!(msg.contains("2025-11-30"));
        assert!(msg.contains("warehouse 3"));
        assert_eq!(err.error_code(), "allocation_commit_error");
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!ServiceError::Conversion {
            product_id: 1,
            unit: "CS".into()
        }
        .is_retryable());
        assert!(!ServiceError::UnmappedItem {
            lot_id: 1,
            product_id: 2,
            item_code: "SKU-2".into()
        }
        .is_retryable());
        assert!(!ServiceError::AllocationNotFound(Uuid::new_v4()).is_retryable());
        assert!(ServiceError::GatewayRegistration {
            reservation_id: Uuid::new_v4(),
            message: "timeout".into()
        }
        .is_retryable());
    }

    #[test]
    fn not_found_is_distinct_from_generic_not_found() {
        let id = Uuid::new_v4();
        let err = ServiceError::AllocationNotFound(id);
        assert_eq!(err.error_code(), "allocation_not_found");
        assert!(err.to_string().contains(&id.to_string()));
    }
}
