use sea_orm::ConnectionTrait;
use tracing::warn;

use crate::entities::lot;
use crate::errors::ServiceError;
use crate::services::unit_conversion::load_item;

/// Guard run before a lot crosses into an external document: its item must be linked to the
/// ERP item master. Never mutates state.
#[derive(Debug, Clone, Copy)]
pub struct MappingValidator {
    required: bool,
}

impl MappingValidator {
    pub fn new(required: bool) -> Self {
        Self { required }
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub async fn validate_lot<C: ConnectionTrait>(
        &self,
        db: &C,
        lot: &lot::Model,
    ) -> Result<(), ServiceError> {
        if !self.required {
            return Ok(());
        }

        let item = load_item(db, lot.product_id).await?;
        if item.has_external_mapping() {
            return Ok(());
        }

        warn!(
            lot_id = lot.id,
            product_id = lot.product_id,
            item_code = %item.item_code,
            "Lot blocked: item has no external item mapping"
        );
        Err(ServiceError::UnmappedItem {
            lot_id: lot.id,
            product_id: lot.product_id,
            item_code: item.item_code,
        })
    }
}
