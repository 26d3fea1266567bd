//! Migration registry - discovery and ordering of units
//!
//! [`Registry::load`] collects all units from a [`UnitSource`], validates
//! identifier uniqueness, and orders them ascending by identifier. It is a
//! pure function of its source: re-running it against the same source
//! yields the same registry. The registry is the single source of truth
//! for what *could* be applied; the ledger for what *has* been.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{MigrateError, MigrateResult};
use crate::unit::MigrationUnit;

/// A discovery strategy supplying the complete unit set.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Produce all available units, in any order. Must be re-runnable with
    /// identical output for identical input.
    async fn units(&self) -> MigrateResult<Vec<MigrationUnit>>;
}

/// The ordered, validated set of migration units.
#[derive(Debug)]
pub struct Registry {
    units: Vec<MigrationUnit>,
}

impl Registry {
    /// Collect units from the source, reject duplicate identifiers, and
    /// sort ascending by identifier.
    pub async fn load(source: &dyn UnitSource) -> MigrateResult<Self> {
        let mut units = source.units().await?;
        units.sort_by(|a, b| a.id().cmp(b.id()));

        for pair in units.windows(2) {
            if pair[0].id() == pair[1].id() {
                return Err(MigrateError::DuplicateIdentifier {
                    id: pair[0].id().to_string(),
                });
            }
        }

        Ok(Self { units })
    }

    /// Units in ascending identifier order
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// In-code unit list. Holds a factory rather than the units themselves so
/// loading stays re-runnable.
pub struct EmbeddedSource {
    build: Box<dyn Fn() -> Vec<MigrationUnit> + Send + Sync>,
}

impl EmbeddedSource {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> Vec<MigrationUnit> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
        }
    }
}

#[async_trait]
impl UnitSource for EmbeddedSource {
    async fn units(&self) -> MigrateResult<Vec<MigrationUnit>> {
        Ok((self.build)())
    }
}

/// Filesystem discovery: scans a directory for `<timestamp>_<name>.sql`
/// files with `-- up` and `-- down` sections. A missing directory yields an
/// empty unit set.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn parse_file(&self, path: &Path) -> MigrateResult<MigrationUnit> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::Source(format!("failed to read {}: {}", path.display(), e))
        })?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                MigrateError::Source(format!("invalid migration filename: {}", path.display()))
            })?;

        // Filename is the identifier; everything after the timestamp is the name.
        let mut parts = stem.splitn(2, '_');
        let timestamp = parts.next().unwrap_or_default();
        let name = match parts.next() {
            Some(rest) if !timestamp.is_empty() => rest.replace('_', " "),
            _ => {
                return Err(MigrateError::Source(format!(
                    "migration filename must follow <timestamp>_<name>.sql: {}",
                    path.display()
                )))
            }
        };

        let (up_sql, down_sql) = parse_sections(&content);

        Ok(MigrationUnit::new(
            stem,
            name,
            move |s| {
                s.raw(&up_sql);
            },
            move |s| {
                s.raw(&down_sql);
            },
        ))
    }
}

#[async_trait]
impl UnitSource for DirectorySource {
    async fn units(&self) -> MigrateResult<Vec<MigrationUnit>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::Source(format!("failed to read {}: {}", self.dir.display(), e))
        })?;

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| MigrateError::Source(format!("failed to read directory entry: {}", e)))?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "sql") {
                units.push(self.parse_file(&path)?);
            }
        }

        Ok(units)
    }
}

/// Extract the `-- up` and `-- down` sections of a migration file. Lines
/// before the first marker, blank lines, and comments are ignored.
fn parse_sections(content: &str) -> (String, String) {
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut section = Section::Preamble;

    for line in content.lines() {
        let marker = line.trim().to_lowercase();
        if marker.starts_with("-- up") {
            section = Section::Up;
            continue;
        } else if marker.starts_with("-- down") {
            section = Section::Down;
            continue;
        }

        if line.trim().is_empty() || line.trim().starts_with("--") {
            continue;
        }

        match section {
            Section::Up => up.push(line),
            Section::Down => down.push(line),
            Section::Preamble => {}
        }
    }

    (up.join("\n"), down.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_sorts_by_identifier_regardless_of_discovery_order() {
        let source = EmbeddedSource::new(|| {
            let mut units = demo::chess_units();
            units.reverse();
            units
        });

        let registry = Registry::load(&source).await.unwrap();
        let ids: Vec<_> = registry.units().iter().map(|u| u.id()).collect();
        assert_eq!(
            ids,
            vec![
                "20231224121152_add_games",
                "20231224135536_clean_games",
                "20231224135659_add_moves",
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_identifier_is_fatal() {
        let source = EmbeddedSource::new(|| {
            vec![
                MigrationUnit::new("20240101000000_a", "a", |_| {}, |_| {}),
                MigrationUnit::new("20240101000000_a", "a again", |_| {}, |_| {}),
            ]
        });

        let err = Registry::load(&source).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::DuplicateIdentifier { ref id } if id == "20240101000000_a"
        ));
    }

    #[tokio::test]
    async fn directory_source_parses_up_and_down_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("20240101120000_create_users.sql"),
            "-- Migration: create users\n\
             -- up\nCREATE TABLE users (id INT);\n\n\
             -- down\nDROP TABLE users;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("20240101130000_create_posts.sql"),
            "-- up\nCREATE TABLE posts (id INT);\n-- down\nDROP TABLE posts;\n",
        )
        .unwrap();
        // Non-SQL files are ignored.
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let source = DirectorySource::new(dir.path());
        let registry = Registry::load(&source).await.unwrap();

        assert_eq!(registry.len(), 2);
        let users = registry.get("20240101120000_create_users").unwrap();
        assert_eq!(users.name(), "create users");
        assert_eq!(
            users.up_statements(),
            vec!["CREATE TABLE users (id INT);"]
        );
        assert_eq!(users.down_statements(), vec!["DROP TABLE users;"]);
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_registry() {
        let source = DirectorySource::new("/nonexistent/migrations");
        let registry = Registry::load(&source).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn filename_without_name_part_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("justaname.sql"), "-- up\nSELECT 1;").unwrap();

        let source = DirectorySource::new(dir.path());
        let err = Registry::load(&source).await.unwrap_err();
        assert!(matches!(err, MigrateError::Source(_)));
    }
}
