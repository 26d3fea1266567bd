use std::fs;
use std::path::Path;

use chrono::Utc;
use tidemark::{MigrationRunner, UnitState, UpOptions};

pub async fn up(runner: &MigrationRunner, to: Option<String>) -> anyhow::Result<()> {
    let report = runner.up(UpOptions { target: to }).await?;

    if report.applied.is_empty() {
        println!(
            "Nothing to apply ({} migration(s) already applied)",
            report.skipped
        );
    } else {
        for id in &report.applied {
            println!("  ✓ {}", id);
        }
        println!(
            "Applied {} migration(s) in {}ms",
            report.applied.len(),
            report.elapsed_ms
        );
    }
    Ok(())
}

pub async fn down(runner: &MigrationRunner, steps: usize) -> anyhow::Result<()> {
    let report = runner.down(steps).await?;

    if report.reverted.is_empty() {
        println!("Nothing to revert");
    } else {
        for id in &report.reverted {
            println!("  ↩ {}", id);
        }
        println!(
            "Reverted {} migration(s) in {}ms",
            report.reverted.len(),
            report.elapsed_ms
        );
    }
    Ok(())
}

pub async fn status(runner: &MigrationRunner, json: bool) -> anyhow::Result<()> {
    let statuses = runner.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("Migration Status:");
    println!("================");
    if statuses.is_empty() {
        println!("No migrations found");
        return Ok(());
    }

    let mut orphans = 0;
    for status in &statuses {
        match &status.state {
            UnitState::Applied { applied_at } => {
                println!("  ✓ {} (applied {})", status.id, applied_at.to_rfc3339());
            }
            UnitState::Pending => println!("  ⏳ {}", status.id),
            UnitState::Orphaned { applied_at } => {
                orphans += 1;
                println!("  ⚠ {} (orphaned, applied {})", status.id, applied_at.to_rfc3339());
            }
        }
    }
    if orphans > 0 {
        println!(
            "\n{} applied identifier(s) have no migration file; the database's \
             history has drifted from this directory",
            orphans
        );
    }
    Ok(())
}

/// Scaffold a new migration file named `<timestamp>_<name>.sql`.
pub fn create(dir: &Path, name: &str) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;

    let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let id = format!("{}_{}", timestamp, name.replace(' ', "_").to_lowercase());
    let path = dir.join(format!("{}.sql", id));

    let template = format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         -- up\n\n\n\
         -- down\n\n",
        name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(&path, template)?;

    println!("Created migration: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_scaffolds_a_parseable_migration() {
        let dir = TempDir::new().unwrap();
        create(dir.path(), "add users table").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);

        let filename = entries[0].file_name().to_string_lossy().to_string();
        assert!(filename.ends_with("_add_users_table.sql"));

        let content = fs::read_to_string(entries[0].path()).unwrap();
        assert!(content.contains("-- Migration: add users table"));
        assert!(content.contains("-- up"));
        assert!(content.contains("-- down"));
    }
}
