pub use sea_orm_migration::prelude::*;

mod m20251018_000001_create_coupon_tables;
mod m20251018_000002_add_claims_table;
mod m20251018_000003_add_rotation_cursor;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251018_000001_create_coupon_tables::Migration),
            Box::new(m20251018_000002_add_claims_table::Migration),
            Box::new(m20251018_000003_add_rotation_cursor::Migration),
        ]
    }
}
