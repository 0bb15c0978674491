//! Embedded schema migrations for the stock engine tables.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_stock_items_table::Migration),
            Box::new(m20240301_000002_create_stock_ledger_entries_table::Migration),
            Box::new(m20240301_000003_create_stock_reservations_table::Migration),
        ]
    }
}

mod m20240301_000001_create_stock_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_stock_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockItems::OrganizationId).uuid().not_null())
                        .col(ColumnDef::new(StockItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockItems::VariantId).uuid().null())
                        .col(ColumnDef::new(StockItems::BranchId).uuid().null())
                        .col(
                            ColumnDef::new(StockItems::StockOnHand)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockItems::StockMin)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(StockItems::StockMax).integer().null())
                        .col(
                            ColumnDef::new(StockItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_items_scope")
                        .table(StockItems::Table)
                        .col(StockItems::OrganizationId)
                        .col(StockItems::ProductId)
                        .col(StockItems::VariantId)
                        .col(StockItems::BranchId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockItems {
        Table,
        Id,
        OrganizationId,
        ProductId,
        VariantId,
        BranchId,
        StockOnHand,
        StockMin,
        StockMax,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_stock_ledger_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_ledger_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLedgerEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLedgerEntries::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::OrganizationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLedgerEntries::VariantId).uuid().null())
                        .col(ColumnDef::new(StockLedgerEntries::BranchId).uuid().null())
                        .col(
                            ColumnDef::new(StockLedgerEntries::MovementKind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::ResultingStock)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedgerEntries::UnitCost)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(StockLedgerEntries::Reference).string().null())
                        .col(ColumnDef::new(StockLedgerEntries::Reason).string().null())
                        .col(ColumnDef::new(StockLedgerEntries::ActorId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLedgerEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_entries_scope")
                        .table(StockLedgerEntries::Table)
                        .col(StockLedgerEntries::OrganizationId)
                        .col(StockLedgerEntries::ProductId)
                        .col(StockLedgerEntries::BranchId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_entries_created_at")
                        .table(StockLedgerEntries::Table)
                        .col(StockLedgerEntries::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLedgerEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockLedgerEntries {
        Table,
        Id,
        OrganizationId,
        ProductId,
        VariantId,
        BranchId,
        MovementKind,
        Quantity,
        ResultingStock,
        UnitCost,
        Reference,
        Reason,
        ActorId,
        CreatedAt,
    }
}

mod m20240301_000003_create_stock_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_stock_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::OrganizationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockReservations::VariantId).uuid().null())
                        .col(ColumnDef::new(StockReservations::BranchId).uuid().null())
                        .col(
                            ColumnDef::new(StockReservations::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::OriginKind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockReservations::OriginId).uuid().null())
                        .col(
                            ColumnDef::new(StockReservations::State)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CanceledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_scope")
                        .table(StockReservations::Table)
                        .col(StockReservations::OrganizationId)
                        .col(StockReservations::ProductId)
                        .col(StockReservations::BranchId)
                        .to_owned(),
                )
                .await?;

            // Sweeper scan path
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_state_expires_at")
                        .table(StockReservations::Table)
                        .col(StockReservations::State)
                        .col(StockReservations::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_origin")
                        .table(StockReservations::Table)
                        .col(StockReservations::OriginKind)
                        .col(StockReservations::OriginId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockReservations {
        Table,
        Id,
        OrganizationId,
        ProductId,
        VariantId,
        BranchId,
        Quantity,
        OriginKind,
        OriginId,
        State,
        ExpiresAt,
        CreatedAt,
        ConfirmedAt,
        CanceledAt,
        UpdatedAt,
    }
}
