//! Error types for the migration engine
//!
//! Every failure is returned to the caller with the failing identifier and
//! underlying cause attached; nothing is swallowed.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Two registered units share an identifier. Registration-time fatal;
    /// never resolved by insertion order.
    #[error("duplicate migration identifier '{id}'")]
    DuplicateIdentifier { id: String },

    /// Could not acquire exclusive run rights within the configured wait.
    /// No state was changed.
    #[error("could not acquire migration lock within {waited_ms}ms")]
    LockTimeout { waited_ms: u64 },

    /// A unit's forward or backward operation failed. The triggering
    /// transaction was rolled back and the run aborted; units committed
    /// before this one remain committed.
    #[error("migration '{id}' failed: {source}")]
    UnitExecution {
        id: String,
        #[source]
        source: sqlx::Error,
    },

    /// The most recently applied identifier has no registered unit, so the
    /// revert order is ambiguous.
    #[error("cannot revert: applied identifier '{id}' has no registered unit")]
    AmbiguousRevert { id: String },

    /// Attempted to revert an identifier the ledger does not contain.
    #[error("migration '{id}' is not applied")]
    NotApplied { id: String },

    /// Attempted to record an identifier the ledger already contains.
    /// Defensive; unreachable under normal runner discipline.
    #[error("migration '{id}' is already applied")]
    DuplicateApplication { id: String },

    /// A target identifier was requested that no registered unit carries.
    #[error("no registered migration with identifier '{id}'")]
    UnknownIdentifier { id: String },

    /// The ledger table could not be created or read.
    #[error("failed to bootstrap ledger table: {0}")]
    LedgerBootstrap(#[source] sqlx::Error),

    /// Database error outside any single unit's execution.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unit source could not be read or parsed.
    #[error("migration source error: {0}")]
    Source(String),

    /// The run was cancelled at a unit boundary. The ledger reflects
    /// everything that fully committed before the cancellation.
    #[error("migration run cancelled")]
    Cancelled,
}

impl MigrateError {
    /// The identifier involved in the failure, when there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            MigrateError::DuplicateIdentifier { id }
            | MigrateError::UnitExecution { id, .. }
            | MigrateError::AmbiguousRevert { id }
            | MigrateError::NotApplied { id }
            | MigrateError::DuplicateApplication { id }
            | MigrateError::UnknownIdentifier { id } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identifier() {
        let err = MigrateError::DuplicateIdentifier {
            id: "20231224121152_add_games".into(),
        };
        assert!(err.to_string().contains("20231224121152_add_games"));
        assert_eq!(err.identifier(), Some("20231224121152_add_games"));
    }

    #[test]
    fn lock_timeout_has_no_identifier() {
        let err = MigrateError::LockTimeout { waited_ms: 30_000 };
        assert!(err.identifier().is_none());
        assert!(err.to_string().contains("30000ms"));
    }
}
