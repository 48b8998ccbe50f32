use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Singleton row (id = 1) for the installation's setup status
        manager
            .create_table(
                Table::create()
                    .table(SetupStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SetupStatus::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SetupStatus::DatabaseConnected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SetupStatus::ExternalAuthConfigured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SetupStatus::FullyConfigured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SetupStatus::HasEverBeenGreen)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(SetupStatus::UpdatedAt).timestamp().null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SetupStatus::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SetupStatus {
    Table,
    Id,
    DatabaseConnected,
    ExternalAuthConfigured,
    FullyConfigured,
    HasEverBeenGreen,
    UpdatedAt,
}
