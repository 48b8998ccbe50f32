pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_sync_status;
mod m20261001_000002_create_category_records;
mod m20261001_000003_create_setup_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_sync_status::Migration),
            Box::new(m20261001_000002_create_category_records::Migration),
            Box::new(m20261001_000003_create_setup_status::Migration),
        ]
    }
}
