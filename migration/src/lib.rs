//! Database migrations for the sync engine.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_connections;
mod m2025_01_01_000002_create_credentials;
mod m2025_01_01_000003_create_connection_executions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_connections::Migration),
            Box::new(m2025_01_01_000002_create_credentials::Migration),
            Box::new(m2025_01_01_000003_create_connection_executions::Migration),
        ]
    }
}
