use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::demand_order::AllocationStatus;

/// One product requirement of a demand. `quantity` is expressed in `unit`, which may differ
/// from the item's internal unit. `internal_quantity` is the converted requirement, recorded when
/// the line is first committed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "demand_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub line_no: i32,
    pub product_id: i64,
    pub warehouse_id: Option<i64>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    pub unit: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub internal_quantity: Option<Decimal>,
    pub allocation_status: AllocationStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::demand_order::Entity",
        from = "Column::OrderId",
        to = "super::demand_order::Column::Id"
    )]
    Order,
}

impl Related<super::demand_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
