use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Item master projection used by unit conversion and the external-mapping guard.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub product_id: i64,
    pub item_code: String,
    pub internal_unit: String,
    /// Linkage to the ERP item master. Required before a lot crosses into an external document.
    pub external_item_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::item_unit_conversion::Entity")]
    UnitConversions,
    #[sea_orm(has_many = "super::lot::Entity")]
    Lots,
}

impl Related<super::item_unit_conversion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UnitConversions.def()
    }
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn has_external_mapping(&self) -> bool {
        self.external_item_code
            .as_deref()
            .map(|code| !code.trim().is_empty())
            .unwrap_or(false)
    }
}
