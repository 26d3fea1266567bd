//! Migration unit - one forward/backward schema-change pair
//!
//! A unit is immutable once registered. Its identifier is opaque but must
//! sort lexicographically; by convention it is `YYYYMMDDHHMMSS_name`. The
//! backward operation is semantically the inverse of the forward one, but
//! not necessarily a perfect inverse: a unit that drops a column may re-add
//! it on the way back without its data. That asymmetry is accepted and is
//! the unit author's call, not an engine defect.

use std::fmt;

use crate::schema::SchemaBuilder;

type SchemaFn = Box<dyn Fn(&mut SchemaBuilder) + Send + Sync>;

/// An immutable forward/backward schema-change pair.
pub struct MigrationUnit {
    id: String,
    name: String,
    up: SchemaFn,
    down: SchemaFn,
    transactional: bool,
}

impl MigrationUnit {
    /// Create a unit from its identifier, human-readable name, and the two
    /// closures over the schema DSL.
    pub fn new<U, D>(id: impl Into<String>, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(&mut SchemaBuilder) + Send + Sync + 'static,
        D: Fn(&mut SchemaBuilder) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            up: Box::new(up),
            down: Box::new(down),
            transactional: true,
        }
    }

    /// Mark this unit's statements as unable to run inside a transaction
    /// (e.g. `CREATE INDEX CONCURRENTLY`). For such units the ledger write
    /// is the unit of recovery: on a crash mid-unit, re-running safely is
    /// the unit author's responsibility.
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the unit's statements run inside a single transaction
    /// together with the ledger mutation.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Evaluate the forward operation into its ordered statements
    pub fn up_statements(&self) -> Vec<String> {
        let mut builder = SchemaBuilder::new();
        (self.up)(&mut builder);
        builder.into_sql()
    }

    /// Evaluate the backward operation into its ordered statements
    pub fn down_statements(&self) -> Vec<String> {
        let mut builder = SchemaBuilder::new();
        (self.down)(&mut builder);
        builder.into_sql()
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("transactional", &self.transactional)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_reproducible() {
        let unit = MigrationUnit::new(
            "20231224121152",
            "add games",
            |s| {
                s.create_table("games", |t| {
                    t.id("id");
                    t.text("pgn");
                });
            },
            |s| {
                s.drop_table("games");
            },
        );

        let first = unit.up_statements();
        let second = unit.up_statements();
        assert_eq!(first, second);
        assert!(first[0].contains("CREATE TABLE games"));
        assert_eq!(unit.down_statements(), vec!["DROP TABLE IF EXISTS games;"]);
        assert!(unit.is_transactional());
    }

    #[test]
    fn non_transactional_flag() {
        let unit = MigrationUnit::new("20240101000000", "concurrent index", |_| {}, |_| {})
            .non_transactional();
        assert!(!unit.is_transactional());
    }
}
