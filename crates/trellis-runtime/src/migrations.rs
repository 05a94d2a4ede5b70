//! SQL-file migrations.
//!
//! [`SqlDirectorySource`] discovers `<root>/<plugin>/*.sql` and turns each
//! file into a migration unit named `<plugin>/<file name>`.  The framework
//! never talks to a database itself; running the SQL is delegated to a
//! [`SqlExecutor`] supplied by the application.  A file that cannot be read
//! still becomes a unit, one that fails when applied.
//!
//! ```text
//! migrations/
//! ├── users/
//! │   ├── 001_create_users.sql
//! │   └── 002_add_email_index.sql
//! └── todos/
//!     └── 001_create_todos.sql
//! ```

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use trellis_core::{BoxError, Database};
use trellis_framework::{Migration, MigrationSource};

/// Runs one SQL script against the application's database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, db: &Database, sql: &str) -> Result<(), BoxError>;
}

/// Discovers per-plugin `.sql` files under a root directory.
pub struct SqlDirectorySource {
    root: PathBuf,
    executor: Arc<dyn SqlExecutor>,
}

impl SqlDirectorySource {
    pub fn new(root: impl Into<PathBuf>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            root: root.into(),
            executor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MigrationSource for SqlDirectorySource {
    async fn discover(&self, plugin: &str) -> Result<Vec<Migration>, BoxError> {
        let dir = self.root.join(plugin);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut units = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(OsStr::to_str) != Some("sql") {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
                continue;
            };
            let name = format!("{plugin}/{file_name}");
            let sql: Arc<str> = match tokio::fs::read_to_string(&path).await {
                Ok(sql) => sql.into(),
                Err(err) => {
                    // fails on its own when applied, siblings still run
                    warn!(migration = %name, error = %err, "Unreadable SQL migration");
                    let error = format!("failed to read {}: {err}", path.display());
                    units.push(Migration::failing(name, error));
                    continue;
                }
            };
            debug!(migration = %name, bytes = sql.len(), "Discovered SQL migration");

            let executor = Arc::clone(&self.executor);
            units.push(Migration::new(name, move |db: Database| {
                let executor = Arc::clone(&executor);
                let sql = Arc::clone(&sql);
                async move { executor.execute(&db, &sql).await }
            }));
        }
        units.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlExecutor for RecordingExecutor {
        async fn execute(&self, _db: &Database, sql: &str) -> Result<(), BoxError> {
            if sql.contains("FAIL") {
                return Err("syntax error".into());
            }
            self.scripts.lock().unwrap().push(sql.trim().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_discovers_sorted_sql_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("users");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("002_index.sql"), "CREATE INDEX users_email;").unwrap();
        fs::write(dir.join("001_create.sql"), "CREATE TABLE users;").unwrap();
        fs::write(dir.join("README.md"), "not a migration").unwrap();

        let executor = Arc::new(RecordingExecutor::default());
        let source = SqlDirectorySource::new(root.path(), executor.clone());
        let units = source.discover("users").await.unwrap();

        let names: Vec<_> = units.iter().map(Migration::name).collect();
        assert_eq!(names, ["users/001_create.sql", "users/002_index.sql"]);

        for unit in &units {
            unit.apply(Database::none()).await.unwrap();
        }
        assert_eq!(
            *executor.scripts.lock().unwrap(),
            ["CREATE TABLE users;", "CREATE INDEX users_email;"]
        );
    }

    #[tokio::test]
    async fn test_missing_plugin_directory_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let source = SqlDirectorySource::new(root.path(), Arc::new(RecordingExecutor::default()));
        assert!(source.discover("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_executor_errors_surface() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("todos");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_bad.sql"), "FAIL").unwrap();

        let source = SqlDirectorySource::new(root.path(), Arc::new(RecordingExecutor::default()));
        let units = source.discover("todos").await.unwrap();
        let err = units[0].apply(Database::none()).await.unwrap_err();
        assert_eq!(err.to_string(), "syntax error");
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_alone() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("users");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_ok.sql"), "CREATE TABLE users;").unwrap();
        fs::write(dir.join("002_bad.sql"), [0xff_u8, 0xfe]).unwrap();

        let executor = Arc::new(RecordingExecutor::default());
        let source = SqlDirectorySource::new(root.path(), executor.clone());
        let units = source.discover("users").await.unwrap();

        let names: Vec<_> = units.iter().map(Migration::name).collect();
        assert_eq!(names, ["users/001_ok.sql", "users/002_bad.sql"]);
        units[0].apply(Database::none()).await.unwrap();
        let err = units[1].apply(Database::none()).await.unwrap_err();
        assert!(err.to_string().contains("002_bad.sql"));
        assert_eq!(*executor.scripts.lock().unwrap(), ["CREATE TABLE users;"]);
    }
}
