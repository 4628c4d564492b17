use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an earmark: TEMPORARY -> ACTIVE -> CONFIRMED, any non-released state -> RELEASED.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ReservationStatus {
    #[sea_orm(string_value = "TEMPORARY")]
    Temporary,
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "RELEASED")]
    Released,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        *self == ReservationStatus::Released
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Temporary, Active) | (Active, Confirmed) | (Temporary, Released) | (Active, Released)
                | (Confirmed, Released)
        )
    }
}

/// Origin of the demand a reservation serves.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SourceType {
    #[sea_orm(string_value = "ORDER")]
    Order,
    #[sea_orm(string_value = "FORECAST")]
    Forecast,
    #[sea_orm(string_value = "MANUAL")]
    Manual,
    #[sea_orm(string_value = "SPOT")]
    Spot,
    #[sea_orm(string_value = "KANBAN")]
    Kanban,
}

impl SourceType {
    /// Business priority used for preemption. Lower tiers are evicted first.
    pub fn preemption_tier(&self) -> u8 {
        match self {
            SourceType::Forecast => 0,
            SourceType::Spot => 1,
            SourceType::Manual => 2,
            SourceType::Order => 3,
            SourceType::Kanban => 4,
        }
    }

    /// Hard demand may preempt soft holds of other sources.
    pub fn is_hard(&self) -> bool {
        matches!(self, SourceType::Order | SourceType::Kanban)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lot_reservations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lot_id: i64,
    pub source_type: SourceType,
    pub source_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reserved_qty: Decimal,
    pub status: ReservationStatus,
    pub sap_document_no: Option<String>,
    pub sap_registered_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::LotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
    #[sea_orm(has_many = "super::reservation_history::Entity")]
    History,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl Related<super::reservation_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}
