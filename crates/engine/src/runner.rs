//! Migration runner - orchestrates up, down, and status
//!
//! Per invocation: acquire the lock, read the ledger, diff it against the
//! registry, execute each unit in its own transaction together with the
//! matching ledger mutation, release the lock on every exit path. Any
//! single unit's failure aborts the run at that point, so the applied set
//! is always a contiguous prefix of the registry ordering and a retry
//! resumes from the first still-pending unit.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{Ledger, LedgerEntry};
use crate::lock::LockManager;
use crate::registry::Registry;
use crate::unit::MigrationUnit;

/// Options for an `up` run
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Apply only units with identifier <= target. `None` applies all.
    pub target: Option<String>,
}

/// What an `up` run did
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Identifiers applied by this run, in execution order
    pub applied: Vec<String>,
    /// Units that were already applied before the run
    pub skipped: usize,
    pub elapsed_ms: u128,
}

/// What a `down` run did
#[derive(Debug, Serialize)]
pub struct RevertReport {
    /// Identifiers reverted by this run, most recent first
    pub reverted: Vec<String>,
    pub elapsed_ms: u128,
}

/// State of one identifier as reported by `status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
    /// In the ledger but absent from the registry: the database's history
    /// has drifted from the current unit source.
    Orphaned { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub id: String,
    /// Human-readable name; orphaned identifiers have none.
    pub name: Option<String>,
    #[serde(flatten)]
    pub state: UnitState,
}

/// Executes migration runs against one database. Connection, registry, and
/// ledger are explicit constructor inputs; there is no global state.
pub struct MigrationRunner {
    pool: PgPool,
    registry: Registry,
    ledger: Ledger,
    lock: LockManager,
    cancel: CancellationToken,
}

impl MigrationRunner {
    pub fn new(pool: PgPool, registry: Registry) -> Self {
        Self {
            pool,
            registry,
            ledger: Ledger::default(),
            lock: LockManager::new("tidemark"),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_lock(mut self, lock: LockManager) -> Self {
        self.lock = lock;
        self
    }

    /// Token checked before each unit; cancelling stops the run cleanly at
    /// the next unit boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply all pending units in ascending identifier order, stopping at
    /// `target` if one is given.
    pub async fn up(&self, opts: UpOptions) -> MigrateResult<ApplyReport> {
        if let Some(target) = opts.target.as_deref() {
            if !self.registry.contains(target) {
                return Err(MigrateError::UnknownIdentifier {
                    id: target.to_string(),
                });
            }
        }

        let lock = self.lock.acquire(&self.pool).await?;
        let outcome = self.up_locked(&opts).await;
        let released = lock.release().await;
        let report = outcome?;
        released?;
        Ok(report)
    }

    async fn up_locked(&self, opts: &UpOptions) -> MigrateResult<ApplyReport> {
        let started = Instant::now();
        self.ledger.bootstrap(&self.pool).await?;

        let applied = {
            let mut conn = self.pool.acquire().await?;
            self.ledger.applied(&mut conn).await?
        };
        let applied_ids: HashSet<&str> = applied.iter().map(|e| e.id.as_str()).collect();
        let pending = pending_units(self.registry.units(), &applied_ids, opts.target.as_deref());
        let skipped = applied_in_registry(self.registry.units(), &applied_ids);

        if pending.is_empty() {
            debug!(skipped, "nothing to apply");
        }

        let mut applied_now = Vec::new();
        for unit in pending {
            if self.cancel.is_cancelled() {
                info!(next = %unit.id(), "run cancelled at unit boundary");
                return Err(MigrateError::Cancelled);
            }

            info!(id = %unit.id(), name = %unit.name(), "applying migration");
            self.apply_unit(unit).await?;
            applied_now.push(unit.id().to_string());
        }

        Ok(ApplyReport {
            applied: applied_now,
            skipped,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    async fn apply_unit(&self, unit: &MigrationUnit) -> MigrateResult<()> {
        let statements = unit.up_statements();

        if unit.is_transactional() {
            let mut tx = self.pool.begin().await?;
            execute_statements(&mut *tx, unit.id(), &statements).await?;
            self.ledger.record_applied(&mut *tx, unit.id()).await?;
            // Dropping an uncommitted transaction rolls it back, so a
            // failure above leaves no trace of this unit.
            tx.commit().await?;
        } else {
            // The ledger write is the unit of recovery: on a crash between
            // the statements and the insert, re-running the unit safely is
            // the unit author's responsibility.
            let mut conn = self.pool.acquire().await?;
            execute_statements(&mut conn, unit.id(), &statements).await?;
            self.ledger.record_applied(&mut conn, unit.id()).await?;
        }
        Ok(())
    }

    /// Revert the most recently applied `steps` units, most recent first.
    pub async fn down(&self, steps: usize) -> MigrateResult<RevertReport> {
        let lock = self.lock.acquire(&self.pool).await?;
        let outcome = self.down_locked(steps).await;
        let released = lock.release().await;
        let report = outcome?;
        released?;
        Ok(report)
    }

    async fn down_locked(&self, steps: usize) -> MigrateResult<RevertReport> {
        let started = Instant::now();
        self.ledger.bootstrap(&self.pool).await?;

        let applied = {
            let mut conn = self.pool.acquire().await?;
            self.ledger.applied(&mut conn).await?
        };
        let to_revert = revert_entries(&applied, steps);

        let mut reverted = Vec::new();
        for entry in to_revert {
            if self.cancel.is_cancelled() {
                info!(next = %entry.id, "run cancelled at unit boundary");
                return Err(MigrateError::Cancelled);
            }

            let unit = self
                .registry
                .get(&entry.id)
                .ok_or_else(|| MigrateError::AmbiguousRevert {
                    id: entry.id.clone(),
                })?;

            info!(id = %unit.id(), name = %unit.name(), "reverting migration");
            self.revert_unit(unit).await?;
            reverted.push(entry.id.clone());
        }

        Ok(RevertReport {
            reverted,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    async fn revert_unit(&self, unit: &MigrationUnit) -> MigrateResult<()> {
        let statements = unit.down_statements();

        if unit.is_transactional() {
            let mut tx = self.pool.begin().await?;
            execute_statements(&mut *tx, unit.id(), &statements).await?;
            self.ledger.record_reverted(&mut *tx, unit.id()).await?;
            tx.commit().await?;
        } else {
            let mut conn = self.pool.acquire().await?;
            execute_statements(&mut conn, unit.id(), &statements).await?;
            self.ledger.record_reverted(&mut conn, unit.id()).await?;
        }
        Ok(())
    }

    /// Report every identifier's state. Mutates nothing beyond the
    /// idempotent ledger bootstrap, which lets status run against a fresh
    /// database. Takes no lock; the snapshot may be stale by the time it
    /// is read, as any status is.
    pub async fn status(&self) -> MigrateResult<Vec<UnitStatus>> {
        self.ledger.bootstrap(&self.pool).await?;
        let mut conn = self.pool.acquire().await?;
        let applied = self.ledger.applied(&mut conn).await?;
        Ok(unit_statuses(self.registry.units(), &applied))
    }
}

async fn execute_statements(
    conn: &mut PgConnection,
    id: &str,
    statements: &[String],
) -> MigrateResult<()> {
    for statement in statements {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::UnitExecution {
                id: id.to_string(),
                source: e,
            })?;
    }
    Ok(())
}

/// Units not yet in the applied set, filtered to `id <= target`, ascending.
/// Assumes `units` is already in registry (ascending) order.
fn pending_units<'a>(
    units: &'a [MigrationUnit],
    applied: &HashSet<&str>,
    target: Option<&str>,
) -> Vec<&'a MigrationUnit> {
    units
        .iter()
        .filter(|u| !applied.contains(u.id()))
        .filter(|u| target.map_or(true, |t| u.id() <= t))
        .collect()
}

/// Applied identifiers that correspond to a registered unit. Orphaned
/// ledger entries are not "already applied units" for reporting purposes.
fn applied_in_registry(units: &[MigrationUnit], applied: &HashSet<&str>) -> usize {
    units.iter().filter(|u| applied.contains(u.id())).count()
}

/// The most recently applied `steps` entries, most recent first. Assumes
/// `applied` is in ascending identifier order.
fn revert_entries(applied: &[LedgerEntry], steps: usize) -> Vec<&LedgerEntry> {
    applied.iter().rev().take(steps).collect()
}

/// Merge the registry and the applied set into per-identifier states,
/// ascending by identifier. Ledger identifiers with no registry unit are
/// surfaced as orphaned, never dropped.
fn unit_statuses(units: &[MigrationUnit], applied: &[LedgerEntry]) -> Vec<UnitStatus> {
    let registered: HashSet<&str> = units.iter().map(|u| u.id()).collect();

    let mut statuses: Vec<UnitStatus> = units
        .iter()
        .map(|unit| {
            let state = match applied.iter().find(|e| e.id == unit.id()) {
                Some(entry) => UnitState::Applied {
                    applied_at: entry.applied_at,
                },
                None => UnitState::Pending,
            };
            UnitStatus {
                id: unit.id().to_string(),
                name: Some(unit.name().to_string()),
                state,
            }
        })
        .collect();

    for entry in applied {
        if !registered.contains(entry.id.as_str()) {
            statuses.push(UnitStatus {
                id: entry.id.clone(),
                name: None,
                state: UnitState::Orphaned {
                    applied_at: entry.applied_at,
                },
            });
        }
    }

    statuses.sort_by(|a, b| a.id.cmp(&b.id));
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;

    fn entry(id: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn pending_is_everything_on_empty_ledger() {
        let units = demo::chess_units();
        let pending = pending_units(&units, &HashSet::new(), None);
        let ids: Vec<_> = pending.iter().map(|u| u.id()).collect();
        assert_eq!(
            ids,
            vec![
                "20231224121152_add_games",
                "20231224135536_clean_games",
                "20231224135659_add_moves",
            ]
        );
    }

    #[test]
    fn pending_resumes_after_applied_prefix() {
        let units = demo::chess_units();
        let applied: HashSet<&str> = ["20231224121152_add_games"].into_iter().collect();
        let pending = pending_units(&units, &applied, None);
        let ids: Vec<_> = pending.iter().map(|u| u.id()).collect();
        assert_eq!(
            ids,
            vec!["20231224135536_clean_games", "20231224135659_add_moves"]
        );
    }

    #[test]
    fn target_bounds_the_pending_set() {
        let units = demo::chess_units();
        let pending = pending_units(&units, &HashSet::new(), Some("20231224135536_clean_games"));
        let ids: Vec<_> = pending.iter().map(|u| u.id()).collect();
        assert_eq!(
            ids,
            vec!["20231224121152_add_games", "20231224135536_clean_games"]
        );
    }

    #[test]
    fn orphaned_ledger_ids_never_enter_the_pending_set() {
        let units = demo::chess_units();
        let applied: HashSet<&str> = ["19990101000000_retired_unit"].into_iter().collect();
        let pending = pending_units(&units, &applied, None);
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn skipped_count_excludes_orphans() {
        let units = demo::chess_units();
        let applied: HashSet<&str> = ["20231224121152_add_games", "19990101000000_retired_unit"]
            .into_iter()
            .collect();
        assert_eq!(applied_in_registry(&units, &applied), 1);
        assert_eq!(applied_in_registry(&units, &HashSet::new()), 0);
    }

    #[test]
    fn revert_order_is_most_recent_first() {
        let applied = vec![entry("a"), entry("b"), entry("c")];
        let ids: Vec<_> = revert_entries(&applied, 2).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        // Asking for more steps than are applied reverts everything.
        assert_eq!(revert_entries(&applied, 10).len(), 3);
        assert!(revert_entries(&applied, 0).is_empty());
    }

    #[test]
    fn statuses_surface_orphans() {
        let units = demo::chess_units();
        let applied = vec![entry("20231224121152_add_games"), entry("20240301000000_gone")];

        let statuses = unit_statuses(&units, &applied);
        assert_eq!(statuses.len(), 4);

        assert!(matches!(statuses[0].state, UnitState::Applied { .. }));
        assert_eq!(statuses[1].state, UnitState::Pending);
        assert_eq!(statuses[2].state, UnitState::Pending);

        let orphan = &statuses[3];
        assert_eq!(orphan.id, "20240301000000_gone");
        assert!(orphan.name.is_none());
        assert!(matches!(orphan.state, UnitState::Orphaned { .. }));
    }

    #[test]
    fn status_json_carries_the_state_tag() {
        let statuses = unit_statuses(&demo::chess_units(), &[]);
        let json = serde_json::to_string(&statuses).unwrap();
        assert!(json.contains("\"state\":\"pending\""));
    }
}
