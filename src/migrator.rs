use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_items_tables::Migration),
            Box::new(m20250101_000002_create_inventory_lots_table::Migration),
            Box::new(m20250101_000003_create_demand_tables::Migration),
            Box::new(m20250101_000004_create_lot_reservations_table::Migration),
            Box::new(m20250101_000005_create_reservation_history_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250101_000001_create_items_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_items_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Items::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Items::ProductId)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Items::ItemCode).string().not_null())
                        .col(ColumnDef::new(Items::InternalUnit).string_len(16).not_null())
                        .col(ColumnDef::new(Items::ExternalItemCode).string().null())
                        .col(
                            ColumnDef::new(Items::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Items::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ItemUnitConversions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ItemUnitConversions::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ItemUnitConversions::ProductId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemUnitConversions::ExternalUnit)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemUnitConversions::Factor)
                                .decimal()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_item_unit_conversions_product_unit")
                        .table(ItemUnitConversions::Table)
                        .col(ItemUnitConversions::ProductId)
                        .col(ItemUnitConversions::ExternalUnit)
                        .unique()
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ItemUnitConversions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Items::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Items {
        Table,
        ProductId,
        ItemCode,
        InternalUnit,
        ExternalItemCode,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ItemUnitConversions {
        Table,
        Id,
        ProductId,
        ExternalUnit,
        Factor,
    }
}

mod m20250101_000002_create_inventory_lots_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_inventory_lots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryLots::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryLots::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryLots::ProductId).big_integer().not_null())
                        .col(ColumnDef::new(InventoryLots::WarehouseId).big_integer().not_null())
                        .col(ColumnDef::new(InventoryLots::LotNumber).string().not_null())
                        .col(ColumnDef::new(InventoryLots::ReceivedDate).date().not_null())
                        .col(ColumnDef::new(InventoryLots::ExpiryDate).date().null())
                        .col(
                            ColumnDef::new(InventoryLots::CurrentQuantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::LockedQuantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::Status)
                                .string_len(16)
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::InspectionStatus)
                                .string_len(16)
                                .not_null()
                                .default("not_required"),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Candidate lookup: product + warehouse, filtered by status
            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_lots_candidates")
                        .table(InventoryLots::Table)
                        .col(InventoryLots::ProductId)
                        .col(InventoryLots::WarehouseId)
                        .col(InventoryLots::Status)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryLots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryLots {
        Table,
        Id,
        ProductId,
        WarehouseId,
        LotNumber,
        ReceivedDate,
        ExpiryDate,
        CurrentQuantity,
        LockedQuantity,
        Status,
        InspectionStatus,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000003_create_demand_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_demand_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DemandOrders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(DemandOrders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(DemandOrders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(DemandOrders::DemandType).string_len(16).not_null())
                        .col(ColumnDef::new(DemandOrders::WarehouseId).big_integer().null())
                        .col(ColumnDef::new(DemandOrders::ShipDate).date().not_null())
                        .col(
                            ColumnDef::new(DemandOrders::AllocationStatus)
                                .string_len(24)
                                .not_null()
                                .default("unallocated"),
                        )
                        .col(
                            ColumnDef::new(DemandOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DemandOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DemandLines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(DemandLines::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(DemandLines::OrderId).uuid().not_null())
                        .col(ColumnDef::new(DemandLines::LineNo).integer().not_null())
                        .col(ColumnDef::new(DemandLines::ProductId).big_integer().not_null())
                        .col(ColumnDef::new(DemandLines::WarehouseId).big_integer().null())
                        .col(
                            ColumnDef::new(DemandLines::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DemandLines::Unit).string_len(16).not_null())
                        .col(ColumnDef::new(DemandLines::InternalQuantity).decimal().null())
                        .col(
                            ColumnDef::new(DemandLines::AllocationStatus)
                                .string_len(24)
                                .not_null()
                                .default("unallocated"),
                        )
                        .col(
                            ColumnDef::new(DemandLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_demand_lines_order")
                                .from(DemandLines::Table, DemandLines::OrderId)
                                .to(DemandOrders::Table, DemandOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_demand_lines_order")
                        .table(DemandLines::Table)
                        .col(DemandLines::OrderId)
                        .col(DemandLines::LineNo)
                        .unique()
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DemandLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DemandOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DemandOrders {
        Table,
        Id,
        OrderNumber,
        DemandType,
        WarehouseId,
        ShipDate,
        AllocationStatus,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum DemandLines {
        Table,
        Id,
        OrderId,
        LineNo,
        ProductId,
        WarehouseId,
        Quantity,
        Unit,
        InternalQuantity,
        AllocationStatus,
        UpdatedAt,
    }
}

mod m20250101_000004_create_lot_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_lot_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LotReservations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(LotReservations::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(LotReservations::LotId).big_integer().not_null())
                        .col(ColumnDef::new(LotReservations::SourceType).string_len(16).not_null())
                        .col(ColumnDef::new(LotReservations::SourceId).uuid().not_null())
                        .col(
                            ColumnDef::new(LotReservations::ReservedQty)
                                .decimal()
                                .not_null()
                                .check(Expr::col(LotReservations::ReservedQty).gt(0)),
                        )
                        .col(ColumnDef::new(LotReservations::Status).string_len(16).not_null())
                        .col(ColumnDef::new(LotReservations::SapDocumentNo).string().null())
                        .col(
                            ColumnDef::new(LotReservations::SapRegisteredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LotReservations::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LotReservations::ReleasedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LotReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LotReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_lot_reservations_lot")
                                .from(LotReservations::Table, LotReservations::LotId)
                                .to(InventoryLots::Table, InventoryLots::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // Availability sums confirmed rows per lot
            manager
                .create_index(
                    Index::create()
                        .name("idx_lot_reservations_lot_status")
                        .table(LotReservations::Table)
                        .col(LotReservations::LotId)
                        .col(LotReservations::Status)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_lot_reservations_source")
                        .table(LotReservations::Table)
                        .col(LotReservations::SourceId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LotReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LotReservations {
        Table,
        Id,
        LotId,
        SourceType,
        SourceId,
        ReservedQty,
        Status,
        SapDocumentNo,
        SapRegisteredAt,
        ConfirmedAt,
        ReleasedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryLots {
        Table,
        Id,
    }
}

mod m20250101_000005_create_reservation_history_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000005_create_reservation_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReservationHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReservationHistory::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ReservationHistory::ReservationId).uuid().not_null())
                        .col(ColumnDef::new(ReservationHistory::LotId).big_integer().not_null())
                        .col(
                            ColumnDef::new(ReservationHistory::Operation)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReservationHistory::OldStatus).string_len(16).null())
                        .col(ColumnDef::new(ReservationHistory::NewStatus).string_len(16).null())
                        .col(
                            ColumnDef::new(ReservationHistory::OldQuantity)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReservationHistory::NewQuantity)
                                .decimal()
                                .null(),
                        )
                        .col(ColumnDef::new(ReservationHistory::OldSapDocumentNo).string().null())
                        .col(ColumnDef::new(ReservationHistory::NewSapDocumentNo).string().null())
                        .col(ColumnDef::new(ReservationHistory::ChangedBy).string().not_null())
                        .col(
                            ColumnDef::new(ReservationHistory::ChangedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReservationHistory::Reason).text().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_reservation_history_reservation")
                        .table(ReservationHistory::Table)
                        .col(ReservationHistory::ReservationId)
                        .col(ReservationHistory::ChangedAt)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReservationHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ReservationHistory {
        Table,
        Id,
        ReservationId,
        LotId,
        Operation,
        OldStatus,
        NewStatus,
        OldQuantity,
        NewQuantity,
        OldSapDocumentNo,
        NewSapDocumentNo,
        ChangedBy,
        ChangedAt,
        Reason,
    }
}
