//! Migration file discovery.
//!
//! Files are named `<YYYYMMDDHHMMSS>_<description>.sql`. Files without a
//! timestamp prefix (seed scripts and the like) are still picked up and
//! validated; they sort after every versioned migration.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::Result;

/// Timestamp format of the version prefix.
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// A migration file read from disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// Filename, e.g. `20240101120000_create_orders.sql`.
    pub script: String,
    pub path: PathBuf,
    /// Parsed timestamp prefix, if the filename has one.
    pub version: Option<NaiveDateTime>,
    pub sql: String,
}

/// Parse the timestamp prefix of a migration filename.
pub fn migration_version(filename: &str) -> Option<NaiveDateTime> {
    let (prefix, _) = filename.split_once('_')?;
    if prefix.len() != 14 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, VERSION_FORMAT).ok()
}

/// Scan all locations for `.sql` files in apply order.
///
/// Versioned files come first, oldest first; unversioned files follow by
/// filename. Missing directories are skipped with a warning.
pub fn scan_migrations(locations: &[PathBuf]) -> Result<Vec<MigrationFile>> {
    let mut migrations = Vec::new();

    for location in locations {
        if !location.is_dir() {
            log::warn!(
                "Migration location not found, skipping; path={}",
                location.display()
            );
            continue;
        }
        scan_dir(location, &mut migrations)?;
    }

    migrations.sort_by(|a, b| {
        (a.version.is_none(), a.version, &a.script).cmp(&(b.version.is_none(), b.version, &b.script))
    });
    log::debug!("Scanned migrations; count={}", migrations.len());
    Ok(migrations)
}

fn scan_dir(dir: &Path, out: &mut Vec<MigrationFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(script) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !script.ends_with(".sql") {
            continue;
        }

        let sql = std::fs::read_to_string(&path)?;
        out.push(MigrationFile {
            version: migration_version(&script),
            script,
            path,
            sql,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_timestamped_version() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(migration_version("20240131093000_create_orders.sql"), Some(expected));
    }

    #[test]
    fn test_unversioned_and_invalid_versions() {
        assert!(migration_version("seed_data.sql").is_none());
        assert!(migration_version("20241399000000_bad.sql").is_none());
        assert!(migration_version("2024_short.sql").is_none());
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20240102000000_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("20240101000000_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let migrations = scan_migrations(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].script, "20240101000000_first.sql");
        assert_eq!(migrations[0].sql, "SELECT 1;");
        assert!(migrations[1].version.is_some());
    }

    #[test]
    fn test_unversioned_files_sort_last() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a_seed.sql"), "INSERT INTO t VALUES (1);").unwrap();
        fs::write(dir.path().join("20240102000000_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("20240101000000_first.sql"), "SELECT 1;").unwrap();

        let migrations = scan_migrations(&[dir.path().to_path_buf()]).unwrap();
        let scripts: Vec<&str> = migrations.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(
            scripts,
            vec!["20240101000000_first.sql", "20240102000000_second.sql", "a_seed.sql"]
        );
    }

    #[test]
    fn test_scan_missing_location_is_skipped() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does_not_exist");
        let migrations = scan_migrations(&[missing]).unwrap();
        assert!(migrations.is_empty());
    }
}
