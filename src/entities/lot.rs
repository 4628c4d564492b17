use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A physical receipt of a product at a warehouse.
///
/// `current_quantity` is decremented only by shipment, withdrawal or adjustment; reservations
/// never touch it. `locked_quantity` is held out of allocation manually.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_lots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub lot_number: String,
    pub received_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub current_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub locked_quantity: Decimal,
    pub status: LotStatus,
    pub inspection_status: InspectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ProductId",
        to = "super::item::Column::ProductId"
    )]
    Item,
    #[sea_orm(has_many = "super::reservation::Entity")]
    Reservations,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Stock physically present and not manually held. Confirmed reservations are subtracted
    /// by the caller, which is the only place that knows their sum.
    pub fn unlocked_quantity(&self) -> Decimal {
        self.current_quantity - self.locked_quantity
    }

    /// Inspection gate: unapproved or failed lots never participate in allocation.
    pub fn is_allocatable(&self) -> bool {
        self.status == LotStatus::Active && self.inspection_status.is_released()
    }

    /// Row-lock acquisition order shared by every writer that locks several lots: expiry
    /// ascending with no-expiry last, then receipt date, then id.
    pub fn lock_key(&self) -> (bool, Option<NaiveDate>, NaiveDate, i64) {
        (
            self.expiry_date.is_none(),
            self.expiry_date,
            self.received_date,
            self.id,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "depleted")]
    Depleted,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "quarantine")]
    Quarantine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    #[sea_orm(string_value = "not_required")]
    NotRequired,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "passed")]
    Passed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl InspectionStatus {
    pub fn is_released(&self) -> bool {
        matches!(self, InspectionStatus::NotRequired | InspectionStatus::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: i64, received: (i32, u32, u32), expiry: Option<(i32, u32, u32)>) -> Model {
        let date = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        Model {
            id,
            product_id: 1,
            warehouse_id: 1,
            lot_number: format!("LOT-{}", id),
            received_date: date(received),
            expiry_date: expiry.map(date),
            current_quantity: Decimal::TEN,
            locked_quantity: Decimal::ZERO,
            status: LotStatus::Active,
            inspection_status: InspectionStatus::NotRequired,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lock_key_orders_by_expiry_then_receipt_then_id() {
        let mut lots = vec![
            lot(1, (2025, 1, 1), None),
            lot(2, (2025, 3, 1), Some((2025, 12, 1))),
            lot(3, (2025, 2, 1), Some((2025, 10, 1))),
            lot(4, (2025, 1, 1), Some((2025, 12, 1))),
            lot(5, (2024, 6, 1), None),
        ];
        lots.sort_by_key(|l| l.lock_key());
        let ids: Vec<i64> = lots.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![3, 4, 2, 5, 1]);
    }
}
