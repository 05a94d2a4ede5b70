//! Migration contract.
//!
//! A migration unit is a named `apply` operation over the database handle.
//! Units come from two places: those embedded in the plugin declaration and
//! those a [`MigrationSource`] discovers for the plugin (the runtime ships a
//! SQL-directory source).  Within a plugin, units run sorted by name; plugins
//! run in dependency order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use trellis_core::{BoxError, Database};

type ApplyFn = Arc<dyn Fn(Database) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// One named migration unit.
#[derive(Clone)]
pub struct Migration {
    name: String,
    apply: ApplyFn,
}

impl Migration {
    pub fn new<F, Fut>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Database) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(move |db: Database| apply(db).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefixes the name with `<plugin>/` unless it already carries it, so
    /// embedded and discovered units of one plugin share a naming scheme.
    pub fn scoped(mut self, plugin: &str) -> Self {
        let already = self
            .name
            .strip_prefix(plugin)
            .is_some_and(|rest| rest.starts_with('/'));
        if !already {
            self.name = format!("{plugin}/{}", self.name);
        }
        self
    }

    /// A unit that fails with `error` whenever it is applied.
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        let error: Arc<str> = error.into().into();
        Self::new(name, move |_db: Database| {
            let error = Arc::clone(&error);
            async move { Err::<(), BoxError>(error.to_string().into()) }
        })
    }

    /// Runs the unit against `db`.
    pub async fn apply(&self, db: Database) -> Result<(), BoxError> {
        (self.apply)(db).await
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish()
    }
}

/// Discovers the migration units of a plugin.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Returns the units found for `plugin`; an empty list when there are none.
    async fn discover(&self, plugin: &str) -> Result<Vec<Migration>, BoxError>;
}

/// What `migrate()` does when a unit fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPolicy {
    /// Log the failure and continue with the next unit and plugin.
    #[default]
    BestEffort,
    /// Stop at the first failure and return it.
    Abort,
}

/// A unit that was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub plugin: String,
    pub migration: String,
}

/// A unit that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMigration {
    pub plugin: String,
    pub migration: String,
    pub error: String,
}

/// Outcome of a `migrate()` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<AppliedMigration>,
    pub failed: Vec<FailedMigration>,
}

impl MigrationReport {
    /// Returns `true` if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
