//! Plugin declarations.
//!
//! A [`Plugin`] is the unit of composition: a name, an optional version, the
//! names of the plugins it depends on, and a service factory, plus optional
//! contributions to the handler-kind, middleware, event, and error
//! vocabularies.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! let counter = Plugin::builder("counter")
//!     .service(|_ctx| async { Ok(Counter::default()) })
//!     .build();
//!
//! let stats = Plugin::builder("stats")
//!     .depends_on("counter")
//!     .service(|ctx| async move {
//!         let counter = ctx.dependency::<Counter>("counter").ok_or("counter missing")?;
//!         Ok(Stats::new(counter))
//!     })
//!     .build();
//! ```
//!
//! # Configuration
//!
//! A plugin receives the `plugins.<name>` section of the configuration file.
//! A value bound with [`Plugin::with_config`] is merged over it:
//!
//! ```rust,ignore
//! manager.register(
//!     Plugin::builder("mailer")
//!         .service(|ctx| async move { Mailer::new(ctx.config::<MailerConfig>()?) })
//!         .build()
//!         .with_config(json!({ "sender": "noreply@example.com" })),
//! )?;
//! ```

mod core;
pub mod migration;

pub use self::core::{ConfiguredPlugin, Plugin, PluginBuilder, ServiceFactory};
pub use migration::{
    AppliedMigration, FailedMigration, Migration, MigrationPolicy, MigrationReport,
    MigrationSource,
};
