use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reservation::ReservationStatus;

/// Append-only audit row written for every reservation mutation. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservation_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub lot_id: i64,
    pub operation: HistoryOperation,
    pub old_status: Option<ReservationStatus>,
    pub new_status: Option<ReservationStatus>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub old_quantity: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub new_quantity: Option<Decimal>,
    pub old_sap_document_no: Option<String>,
    pub new_sap_document_no: Option<String>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryOperation {
    #[sea_orm(string_value = "INSERT")]
    Insert,
    #[sea_orm(string_value = "ACTIVATE")]
    Activate,
    #[sea_orm(string_value = "CONFIRM")]
    Confirm,
    #[sea_orm(string_value = "RELEASE")]
    Release,
    #[sea_orm(string_value = "PREEMPT")]
    Preempt,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reservation::Entity",
        from = "Column::ReservationId",
        to = "super::reservation::Column::Id"
    )]
    Reservation,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
