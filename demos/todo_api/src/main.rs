//! Todo API Example
//!
//! A small todo service showing the Trellis plugin model:
//!
//! - `audit` plugin: request counter service plus `audit` and `require_json`
//!   middleware
//! - `todos` plugin: the todo store, custom errors and the `todo.created` event
//! - `todos` router: typed, html, stream, sse and form-data routes
//!
//! # Usage
//!
//! ```bash
//! cargo run --package todo-api -- --config demos/todo_api/trellis.toml
//!
//! curl -X POST localhost:3000/api/todos/write/create \
//!      -H 'content-type: application/json' -d '{"title": "try trellis"}'
//! curl -X POST localhost:3000/api/todos.list
//! curl -N localhost:3000/api/todos/watch
//! ```

mod api;
mod broadcast;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use trellis::core::Broadcaster;
use trellis::prelude::*;

use crate::broadcast::ChannelBroadcaster;

#[derive(Parser, Debug)]
#[command(about = "A small todo service built on Trellis")]
struct Args {
    /// Configuration file; `trellis.toml` in the current directory otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (e.g. "development", "production").
    #[arg(short, long)]
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = TrellisApp::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }

    let broadcaster = Arc::new(ChannelBroadcaster::new());
    let core = CoreServices::builder()
        .extension::<dyn Broadcaster>(broadcaster.clone())
        .extension(broadcaster)
        .build();

    builder
        .build()?
        .core_services(core)
        .plugin(api::audit_plugin())
        .plugin(api::todos_plugin())
        .router(api::todos_router())
        .run()
        .await?;

    Ok(())
}
