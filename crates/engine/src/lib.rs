//! # tidemark: schema migration engine for PostgreSQL
//!
//! Applies an ordered set of reversible schema-change units to a database,
//! tracks which units have been applied in a ledger table, and serializes
//! concurrent runs with an advisory lock.
//!
//! The pieces, bottom up:
//! - [`MigrationUnit`]: one forward/backward schema-change pair with a
//!   unique, lexicographically sortable identifier.
//! - [`Registry`]: discovers and orders the complete unit set from a
//!   [`UnitSource`] (embedded list or directory of `.sql` files).
//! - [`Ledger`]: the `(id, applied_at)` table that is the single source of
//!   truth for what has been applied.
//! - [`LockManager`]: advisory-lock mutual exclusion so only one process
//!   migrates a given database at a time.
//! - [`MigrationRunner`]: orchestrates `up`, `down`, and `status`.

pub mod cancel;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod unit;

#[cfg(test)]
mod demo;

pub use cancel::CancellationToken;
pub use error::{MigrateError, MigrateResult};
pub use ledger::{Ledger, LedgerEntry};
pub use lock::{LockManager, LockWait, MigrationLock};
pub use registry::{DirectorySource, EmbeddedSource, Registry, UnitSource};
pub use runner::{ApplyReport, MigrationRunner, RevertReport, UnitState, UnitStatus, UpOptions};
pub use schema::{SchemaBuilder, TableBuilder};
pub use unit::MigrationUnit;
