//! Applied-state ledger - the persistent record of applied units
//!
//! A row exists for identifier X if and only if X's forward operation has
//! been committed and not subsequently rolled back. The insert and delete
//! run on the caller's connection so the runner can make them atomic with
//! the unit's own statements. Ordinary migrations cannot bootstrap the
//! table that tracks migrations, so the table is created lazily with an
//! idempotent `CREATE TABLE IF NOT EXISTS` outside any transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::{MigrateError, MigrateResult};

/// Default name of the ledger table
pub const DEFAULT_TABLE: &str = "tidemark_ledger";

/// One applied unit
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

/// The ledger over a configurable table name. All reads and writes go
/// through an explicit connection handle; there is no process-wide state.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist. Idempotent, runs
    /// outside any transaction.
    pub async fn bootstrap(&self, pool: &PgPool) -> MigrateResult<()> {
        sqlx::query(&self.create_table_sql())
            .execute(pool)
            .await
            .map_err(MigrateError::LedgerBootstrap)?;
        Ok(())
    }

    /// All applied entries, ascending by identifier. Run on the mutation
    /// transaction's connection when a mutation will follow the read.
    pub async fn applied(&self, conn: &mut PgConnection) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.select_sql())
            .fetch_all(conn)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(LedgerEntry {
                id: row.try_get("id")?,
                applied_at: row.try_get("applied_at")?,
            });
        }
        Ok(entries)
    }

    /// Record a unit as applied. Fails with `DuplicateApplication` if the
    /// identifier is already present.
    pub async fn record_applied(
        &self,
        conn: &mut PgConnection,
        id: &str,
    ) -> MigrateResult<DateTime<Utc>> {
        let applied_at = Utc::now();
        let result = sqlx::query(&self.insert_sql())
            .bind(id)
            .bind(applied_at)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::DuplicateApplication { id: id.to_string() });
        }
        Ok(applied_at)
    }

    /// Remove a unit's entry after its backward operation. Fails with
    /// `NotApplied` if the identifier is absent.
    pub async fn record_reverted(&self, conn: &mut PgConnection, id: &str) -> MigrateResult<()> {
        let result = sqlx::query(&self.delete_sql())
            .bind(id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::NotApplied { id: id.to_string() });
        }
        Ok(())
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id TEXT PRIMARY KEY,\n    \
                applied_at TIMESTAMPTZ NOT NULL\n\
            );",
            self.table
        )
    }

    /// SQL to read the applied set
    pub fn select_sql(&self) -> String {
        format!("SELECT id, applied_at FROM {} ORDER BY id ASC", self.table)
    }

    /// SQL to record an applied unit. `ON CONFLICT DO NOTHING` lets the
    /// caller detect double application from the affected row count.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, applied_at) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            self.table
        )
    }

    /// SQL to remove a reverted unit
    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = $1", self.table)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_targets_configured_table() {
        let ledger = Ledger::new("my_ledger");

        let create = ledger.create_table_sql();
        assert!(create.contains("CREATE TABLE IF NOT EXISTS my_ledger"));
        assert!(create.contains("id TEXT PRIMARY KEY"));
        assert!(create.contains("applied_at TIMESTAMPTZ NOT NULL"));

        assert_eq!(
            ledger.select_sql(),
            "SELECT id, applied_at FROM my_ledger ORDER BY id ASC"
        );
        assert!(ledger.insert_sql().starts_with("INSERT INTO my_ledger"));
        assert_eq!(ledger.delete_sql(), "DELETE FROM my_ledger WHERE id = $1");
    }

    #[test]
    fn default_table_name() {
        assert_eq!(Ledger::default().table(), DEFAULT_TABLE);
    }
}
