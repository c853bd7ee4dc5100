//! Database migrations for the gitea-mirror schema.
//!
//! Only compiled with the `migrate` feature.

pub use sea_orm_migration::prelude::*;

mod m20261018_000001_create_schema;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20261018_000001_create_schema::Migration)]
    }

    fn migration_table_name() -> SeaRc<dyn Iden> {
        SeaRc::new(Alias::new("gitea_mirror_migrations"))
    }
}
