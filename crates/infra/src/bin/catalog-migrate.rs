//! Apply the catalog schema to the database named by `DATABASE_URL`.

use anyhow::Context;

use bazaar_infra::{InfraConfig, PostgresCatalogStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bazaar_observability::init();

    let config = InfraConfig::from_env().context("invalid configuration")?;
    let database = config.require_database()?;

    PostgresCatalogStore::connect(database)
        .await
        .context("failed to migrate catalog schema")?;

    tracing::info!(max_connections = database.max_connections, "catalog schema is up to date");
    Ok(())
}
