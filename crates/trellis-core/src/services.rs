//! The Core-Services bundle.
//!
//! [`CoreServices`] is threaded through every plugin context and every request
//! context without being interpreted by the framework.  It holds:
//!
//! - the [`Database`] handle (opaque; migrations and services downcast it),
//! - the shared [`ErrorRegistry`],
//! - a type-keyed set of extension services (cache, event bus, scheduler,
//!   job queue, SSE broadcaster, rate limiter, …).
//!
//! Extensions are keyed by the type they are requested as, which may be a
//! trait object:
//!
//! ```rust,ignore
//! let core = CoreServices::builder()
//!     .database(Database::new(pool))
//!     .extension::<dyn Broadcaster>(Arc::new(MyBroadcaster::default()))
//!     .build();
//!
//! let sse: Arc<dyn Broadcaster> = core.get::<dyn Broadcaster>().unwrap();
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ErrorRegistry;

// =============================================================================
// Database
// =============================================================================

/// Opaque, cheaply cloneable database handle.
///
/// The framework never looks inside; consumers recover their concrete pool or
/// connection type with [`get`](Self::get).
#[derive(Clone, Default)]
pub struct Database {
    inner: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Database {
    /// Wraps a concrete handle.
    pub fn new<T: Any + Send + Sync>(handle: Arc<T>) -> Self {
        Self {
            inner: Some(handle),
            type_name: type_name::<T>(),
        }
    }

    /// A handle with no database behind it.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if a database was configured.
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    /// Recovers the concrete handle.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .as_ref()
            .and_then(|inner| Arc::clone(inner).downcast::<T>().ok())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Some(_) => write!(f, "Database({})", self.type_name),
            None => f.write_str("Database(none)"),
        }
    }
}

// =============================================================================
// CoreServices
// =============================================================================

/// The opaque aggregate of core services shared by all plugins and requests.
pub struct CoreServices {
    db: Database,
    errors: Arc<ErrorRegistry>,
    /// `TypeId::of::<T>()` → `Arc<Arc<T>>` upcast to `Any`.
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl CoreServices {
    /// A bundle with no database, the built-in error vocabulary, and no extensions.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CoreServicesBuilder {
        CoreServicesBuilder::default()
    }

    /// The database handle.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The error-type registry.
    pub fn errors(&self) -> &Arc<ErrorRegistry> {
        &self.errors
    }

    /// Looks up an extension service by the type it was registered as.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<Arc<T>>().map(Arc::clone))
    }

    /// Returns `true` if an extension of type `T` is present.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for CoreServices {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoreServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreServices")
            .field("db", &self.db)
            .field("errors", &self.errors)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Builder for [`CoreServices`].
#[derive(Default)]
pub struct CoreServicesBuilder {
    db: Database,
    errors: Option<Arc<ErrorRegistry>>,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl CoreServicesBuilder {
    /// Sets the database handle.
    pub fn database(mut self, db: Database) -> Self {
        self.db = db;
        self
    }

    /// Uses an existing error registry instead of a fresh one.
    pub fn errors(mut self, errors: Arc<ErrorRegistry>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Adds an extension service, replacing any previous one of the same type.
    pub fn extension<T: ?Sized + Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    pub fn build(self) -> CoreServices {
        CoreServices {
            db: self.db,
            errors: self.errors.unwrap_or_default(),
            extensions: self.extensions,
        }
    }
}
