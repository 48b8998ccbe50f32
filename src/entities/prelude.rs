//! `SeaORM` Entity prelude

pub use super::category_records::Entity as CategoryRecords;
pub use super::setup_status::Entity as SetupStatus;
pub use super::sync_status::Entity as SyncStatus;
