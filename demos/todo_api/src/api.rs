//! The `audit` and `todos` plugins and the `todos` router.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use trellis::core::SchemaError;
use trellis::core::http::{StatusCode, header};
use trellis::prelude::*;

use crate::broadcast::ChannelBroadcaster;
use crate::store::{Todo, TodoStore};

pub const TODOS_CHANNEL: &str = "todos";

// ============================================================================
// audit
// ============================================================================

/// Per-process request counter, labelled from `[plugins.audit]`.
pub struct AuditLog {
    label: String,
    requests: AtomicU64,
}

impl AuditLog {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Whole microseconds, saturating at `u64::MAX`.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Logs every request passing through the `audit` middleware.
pub fn audit_plugin() -> Plugin {
    Plugin::builder("audit")
        .version("0.1.0")
        .service(|ctx| async move {
            let label = ctx.raw_config()["label"]
                .as_str()
                .unwrap_or("audit")
                .to_string();
            Ok(AuditLog {
                label,
                requests: AtomicU64::new(0),
            })
        })
        .middleware(
            "audit",
            middleware_fn(|req, ctx, next, config| async move {
                let path = req.uri().path().to_string();
                let started = Instant::now();
                let result = next.run(req).await;

                let status = match &result {
                    Ok(response) => response.status().as_u16(),
                    Err(err) => err
                        .downcast_ref::<HttpError>()
                        .map_or(500, |e| e.status().as_u16()),
                };
                if let Some(log) = ctx.service::<AuditLog>("audit") {
                    log.requests.fetch_add(1, Ordering::Relaxed);
                    info!(
                        label = %log.label,
                        scope = %config["scope"].as_str().unwrap_or("-"),
                        path = %path,
                        ip = %ctx.ip(),
                        status,
                        elapsed_us = micros(started.elapsed()),
                        "Request handled"
                    );
                }
                result
            }),
        )
        .middleware(
            "require_json",
            middleware_fn(|req, _ctx, next, _config| async move {
                let is_json = req
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("application/json"));
                if !is_json && !req.body().is_empty() {
                    return Err(HttpError::new(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        "UNSUPPORTED_MEDIA_TYPE",
                        "expected an application/json body",
                    )
                    .into());
                }
                next.run(req).await
            }),
        )
        .build()
}

// ============================================================================
// todos
// ============================================================================

#[derive(Debug, Deserialize)]
struct TodosConfig {
    #[serde(default = "default_max_items")]
    max_items: usize,
}

fn default_max_items() -> usize {
    1000
}

/// Owns the [`TodoStore`].
pub fn todos_plugin() -> Plugin {
    Plugin::builder("todos")
        .version("0.1.0")
        .depends_on("audit")
        .service(|ctx| async move {
            let config: TodosConfig = ctx.config()?;
            info!(max_items = config.max_items, "Todo store ready");
            Ok(TodoStore::new(config.max_items))
        })
        .event("todo.created", todo_schema())
        .custom_error(
            "TodoNotFound",
            ErrorDefinition::new(404, "TODO_NOT_FOUND", "todo not found"),
        )
        .custom_error(
            "TodoLimit",
            ErrorDefinition::new(409, "TODO_LIMIT", "todo limit reached"),
        )
        .build()
}

#[derive(Debug, Deserialize)]
struct TodoId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct NewTodo {
    title: String,
}

fn id_schema() -> SchemaRef {
    schema_fn(|value| match value.get("id") {
        Some(id) if id.is_u64() => Ok(value),
        _ => Err(SchemaError::single("/id", "expected a positive integer")),
    })
}

fn new_todo_schema() -> SchemaRef {
    schema_fn(|value| {
        let title = value
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .ok_or_else(|| SchemaError::single("/title", "expected a string"))?;
        if title.is_empty() {
            return Err(SchemaError::single("/title", "must not be empty"));
        }
        Ok(json!({ "title": title }))
    })
}

fn todo_schema() -> SchemaRef {
    schema_fn(|value| {
        serde_json::from_value::<Todo>(value.clone())
            .map(|_| value)
            .map_err(|e| SchemaError::single("", e.to_string()))
    })
}

fn store(ctx: &ServerContext) -> Result<Arc<TodoStore>, HttpError> {
    ctx.service::<TodoStore>("todos")
        .ok_or_else(|| HttpError::internal("todo store unavailable"))
}

fn not_found(ctx: &ServerContext, id: u64) -> HttpError {
    ctx.error("TodoNotFound", Some(&format!("todo {id} not found")))
}

fn publish_created(ctx: &ServerContext, todo: &Todo) {
    if let Some(broadcaster) = ctx.core().get::<ChannelBroadcaster>() {
        broadcaster.publish(SseEvent::new(TODOS_CHANNEL, "todo.created", json!(todo)));
    }
}

fn render_page(todos: &[Todo]) -> String {
    let items: String = todos
        .iter()
        .map(|todo| {
            let mark = if todo.done { "x" } else { " " };
            format!("<li>[{mark}] {}</li>", escape_html(&todo.title))
        })
        .collect();
    format!("<!doctype html><html><body><h1>Todos</h1><ul>{items}</ul></body></html>")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Routes under `todos.*`.
pub fn todos_router() -> Router {
    let mut router = Router::new("todos");
    router.middleware("audit", json!({ "scope": "todos" }));

    router
        .route("list")
        .typed(TypedRoute::new(|_: (), ctx| async move { Ok(store(&ctx)?.list()) }));

    router.route("get").typed(
        TypedRoute::new(|input: TodoId, ctx| async move {
            let todo = store(&ctx)?.get(input.id);
            Ok(todo.ok_or_else(|| not_found(&ctx, input.id))?)
        })
        .input(id_schema())
        .output(todo_schema()),
    );

    router.route("page").html(HtmlRoute::new(|_: (), ctx| async move {
        Ok(render_page(&store(&ctx)?.list()))
    }));

    router.route("export").stream(StreamRoute::new(|_: (), ctx| async move {
        let lines = store(&ctx)?.list().into_iter().map(|todo| {
            let mut line = serde_json::to_vec(&todo)?;
            line.push(b'\n');
            Ok::<Bytes, BoxError>(Bytes::from(line))
        });
        let response = trellis::core::http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(Body::from_stream(stream::iter(lines)))?;
        Ok(response)
    }));

    // frames are checked against the `todos` plugin's event schemas
    router.route("watch").sse(SseRoute::new(|_: (), _ctx| async {
        Ok(vec![TODOS_CHANNEL.to_string()])
    }));

    let write = router.nest("write");
    write.middleware("require_json", Value::Null);

    write.route("create").typed(
        TypedRoute::new(|input: NewTodo, ctx| async move {
            let todo = store(&ctx)?
                .create(input.title)
                .ok_or_else(|| ctx.error("TodoLimit", None))?;
            publish_created(&ctx, &todo);
            Ok(todo)
        })
        .input(new_todo_schema())
        .output(todo_schema()),
    );

    write.route("toggle").typed(
        TypedRoute::new(|input: TodoId, ctx| async move {
            let todo = store(&ctx)?.toggle(input.id);
            Ok(todo.ok_or_else(|| not_found(&ctx, input.id))?)
        })
        .input(id_schema()),
    );

    write.route("remove").typed(
        TypedRoute::new(|input: TodoId, ctx| async move {
            let todo = store(&ctx)?.remove(input.id);
            Ok(todo.ok_or_else(|| not_found(&ctx, input.id))?)
        })
        .input(id_schema()),
    );

    // One todo per non-empty line of each uploaded text file.
    router.route("import").form_data(
        FormRoute::new(|form: FormInput, ctx| async move {
            let store = store(&ctx)?;
            let mut created = Vec::new();
            for file in &form.files {
                let text = std::str::from_utf8(&file.data)
                    .map_err(|_| HttpError::bad_request("uploaded file is not UTF-8"))?;
                for title in text.lines().map(str::trim).filter(|t| !t.is_empty()) {
                    let todo = store
                        .create(title)
                        .ok_or_else(|| ctx.error("TodoLimit", None))?;
                    publish_created(&ctx, &todo);
                    created.push(todo);
                }
            }
            Ok(json!({ "imported": created.len(), "todos": created }))
        })
        .files(schema_fn(|files| match files.as_array() {
            Some(list) if !list.is_empty() => Ok(files),
            _ => Err(SchemaError::single("", "at least one file is required")),
        })),
    );

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis::core::http::{Method, Request};
    use trellis::framework::{Dispatcher, PluginManager};

    async fn dispatcher(max_items: usize) -> (Dispatcher, Arc<ChannelBroadcaster>) {
        let broadcaster = Arc::new(ChannelBroadcaster::new());
        let core = CoreServices::builder()
            .extension::<dyn trellis::core::Broadcaster>(broadcaster.clone())
            .extension(broadcaster.clone())
            .build();

        let mut manager = PluginManager::new(Arc::new(core)).with_plugin_configs(
            [("todos".to_string(), json!({ "max_items": max_items }))].into(),
        );
        manager.register(todos_plugin()).unwrap();
        manager.register(audit_plugin()).unwrap();
        manager.init().await.unwrap();

        let dispatcher = Dispatcher::builder(&manager).router(todos_router()).build();
        (dispatcher, broadcaster)
    }

    #[test]
    fn test_micros_saturates() {
        assert_eq!(micros(Duration::from_millis(3)), 3_000);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }

    async fn call(dispatcher: &Dispatcher, route: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/{route}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(body.to_string()))
            .unwrap();
        let response = dispatcher.handle(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (dispatcher, _) = dispatcher(10).await;
        let (status, todo) = call(&dispatcher, "todos/write/create", json!({"title": "  buy milk "})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(todo, json!({"id": 1, "title": "buy milk", "done": false}));

        let (status, todo) = call(&dispatcher, "todos.get", json!({"id": 1})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(todo["title"], "buy milk");
    }

    #[tokio::test]
    async fn test_missing_todo_uses_plugin_error() {
        let (dispatcher, _) = dispatcher(10).await;
        let (status, body) = call(&dispatcher, "todos.get", json!({"id": 7})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "TODO_NOT_FOUND");
        assert_eq!(body["message"], "todo 7 not found");
    }

    #[tokio::test]
    async fn test_limit_from_plugin_config() {
        let (dispatcher, _) = dispatcher(1).await;
        call(&dispatcher, "todos.write.create", json!({"title": "one"})).await;
        let (status, body) = call(&dispatcher, "todos.write.create", json!({"title": "two"})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "TODO_LIMIT");
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let (dispatcher, _) = dispatcher(10).await;
        let (status, body) = call(&dispatcher, "todos.write.create", json!({"title": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_write_routes_require_json() {
        let (dispatcher, _) = dispatcher(10).await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/todos/write/create")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"title"))
            .unwrap();
        let response = dispatcher.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_created_todos_are_broadcast() {
        let (dispatcher, broadcaster) = dispatcher(10).await;
        let mut events = trellis::core::Broadcaster::subscribe(
            broadcaster.as_ref(),
            "watcher",
            &[TODOS_CHANNEL.to_string()],
        );
        call(&dispatcher, "todos.write.create", json!({"title": "ping"})).await;

        use futures::StreamExt;
        let event = events.next().await.unwrap();
        assert_eq!(event.event, "todo.created");
        assert_eq!(event.data["title"], "ping");
    }

    #[tokio::test]
    async fn test_plugin_events_are_published_by_dispatcher() {
        let (dispatcher, _) = dispatcher(10).await;
        let events = dispatcher.event_schemas();
        assert_eq!(events.keys().collect::<Vec<_>>(), ["todo.created"]);
        assert!(dispatcher.metadata().iter().all(|route| route.events.is_empty()));
    }

    #[tokio::test]
    async fn test_export_streams_ndjson() {
        let (dispatcher, _) = dispatcher(10).await;
        call(&dispatcher, "todos.write.create", json!({"title": "a"})).await;
        call(&dispatcher, "todos.write.create", json!({"title": "b"})).await;

        let (status, body) = call(&dispatcher, "todos.export", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let text = body.as_str().unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_page_escapes_titles() {
        let (dispatcher, _) = dispatcher(10).await;
        call(&dispatcher, "todos.write.create", json!({"title": "<b>bold</b>"})).await;
        let (status, body) = call(&dispatcher, "todos.page", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("&lt;b&gt;bold&lt;/b&gt;"));
    }

    #[tokio::test]
    async fn test_audit_counts_requests() {
        let broadcaster = Arc::new(ChannelBroadcaster::new());
        let core = CoreServices::builder().extension(broadcaster).build();
        let mut manager = PluginManager::new(Arc::new(core));
        manager.register(audit_plugin()).unwrap();
        manager.register(todos_plugin()).unwrap();
        manager.init().await.unwrap();
        let dispatcher = Dispatcher::builder(&manager).router(todos_router()).build();

        call(&dispatcher, "todos.list", Value::Null).await;
        call(&dispatcher, "todos.get", json!({"id": 1})).await;

        let audit = manager.services().get::<AuditLog>("audit").unwrap();
        assert_eq!(audit.requests(), 2);
    }
}
