pub mod migrate;

use sqlx::postgres::PgPoolOptions;
use tidemark::{DirectorySource, Ledger, MigrationRunner, Registry};

use crate::Cli;

/// Connect, load the registry from the migrations directory, and assemble
/// a runner from the CLI's configuration.
pub async fn build_runner(cli: &Cli) -> anyhow::Result<MigrationRunner> {
    let url = cli.database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;

    let source = DirectorySource::new(&cli.dir);
    let registry = Registry::load(&source).await?;

    Ok(MigrationRunner::new(pool, registry)
        .with_ledger(Ledger::new(&cli.table))
        .with_lock(cli.lock_manager()))
}
