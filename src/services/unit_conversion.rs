use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::warn;

use crate::entities::item::{self, Entity as Item};
use crate::entities::item_unit_conversion::{self, Entity as ItemUnitConversion};
use crate::errors::ServiceError;
use crate::quantity::{self, UnitProfile};

pub async fn load_item<C: ConnectionTrait>(db: &C, product_id: i64) -> Result<item::Model, ServiceError> {
    Item::find_by_id(product_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item for product {} not found", product_id)))
}

/// Factor for `external_unit`, matched case-insensitively. `None` when no mapping exists.
pub async fn conversion_factor<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    external_unit: &str,
) -> Result<Option<Decimal>, ServiceError> {
    let conversions = ItemUnitConversion::find()
        .filter(item_unit_conversion::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(conversions
        .into_iter()
        .find(|c| c.external_unit.trim().eq_ignore_ascii_case(external_unit.trim()))
        .map(|c| c.factor))
}

/// Converts `qty_external` expressed in `external_unit` into the item's internal unit.
pub async fn to_internal_qty<C: ConnectionTrait>(
    db: &C,
    item: &item::Model,
    qty_external: Decimal,
    external_unit: &str,
) -> Result<Decimal, ServiceError> {
    let profile = UnitProfile {
        product_id: item.product_id,
        internal_unit: &item.internal_unit,
    };
    let factor = if item.internal_unit.trim().eq_ignore_ascii_case(external_unit.trim()) {
        None
    } else {
        conversion_factor(db, item.product_id, external_unit).await?
    };

    quantity::to_internal(&profile, qty_external, external_unit, factor).map_err(|e| {
        if let ServiceError::Conversion { .. } = &e {
            warn!(
                product_id = item.product_id,
                item_code = %item.item_code,
                unit = external_unit,
                "Missing unit conversion; fix item master data"
            );
        }
        e
    })
}

/// Inverse of [`to_internal_qty`].
pub async fn from_internal_qty<C: ConnectionTrait>(
    db: &C,
    item: &item::Model,
    qty_internal: Decimal,
    external_unit: &str,
) -> Result<Decimal, ServiceError> {
    let profile = UnitProfile {
        product_id: item.product_id,
        internal_unit: &item.internal_unit,
    };
    let factor = if item.internal_unit.trim().eq_ignore_ascii_case(external_unit.trim()) {
        None
    } else {
        conversion_factor(db, item.product_id, external_unit).await?
    };
    quantity::from_internal(&profile, qty_internal, external_unit, factor)
}
