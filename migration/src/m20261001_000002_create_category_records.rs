use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CategoryRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CategoryRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CategoryRecords::Category)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CategoryRecords::TenantId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CategoryRecords::RecordKey)
                            .string_len(255)
                            .not_null(),
                    )
                    // Opaque pass-through payload, serialized JSON
                    .col(ColumnDef::new(CategoryRecords::Payload).text().not_null())
                    .col(
                        ColumnDef::new(CategoryRecords::SyncedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per (category, tenant, key); a duplicate aborts the whole replace
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_category_records_unique_key")
                    .table(CategoryRecords::Table)
                    .col(CategoryRecords::Category)
                    .col(CategoryRecords::TenantId)
                    .col(CategoryRecords::RecordKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CategoryRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum CategoryRecords {
    Table,
    Id,
    Category,
    TenantId,
    RecordKey,
    Payload,
    SyncedAt,
}
