// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP/REST + WebSocket surface.
//!
//! Routes are registered explicitly; the endpoint catalogue in
//! [`endpoints`] drives OpenAPI generation and metadata. Authentication is
//! a single shared bearer secret with `read`/`manage` levels.

use std::future::IntoFuture;
use std::pin::pin;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

pub mod auth;
pub mod endpoints;
pub mod openapi;
pub mod ws;

use self::auth::Permission;
use crate::actions::{Actions, Error as ActionError, ListParams};
use crate::config::Config;
use crate::context::Context;
use crate::environment;
use crate::image::ImageConfig;
use crate::response::{render_json, Response as ApmResponse};

#[derive(Clone)]
pub struct AppState {
    actions: Actions,
    token: Option<String>,
}

impl AppState {
    pub fn new(actions: Actions, token: Option<String>) -> Self {
        Self { actions, token }
    }
}

/// Assemble the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1", get(meta))
        .route("/api/v1/health", get(health))
        .route("/api/v1/docs", get(docs))
        .route("/api/v1/openapi.json", get(openapi_json))
        .route("/api/v1/packages", get(list))
        .route("/api/v1/packages/search", get(search))
        .route("/api/v1/packages/filter-fields", get(filter_fields))
        .route("/api/v1/packages/install", post(install))
        .route("/api/v1/packages/remove", post(remove))
        .route("/api/v1/packages/check-install", post(check_install))
        .route("/api/v1/packages/check-remove", post(check_remove))
        .route("/api/v1/packages/{name}", get(info_handler))
        .route("/api/v1/system/check-upgrade", get(check_upgrade))
        .route("/api/v1/system/update", post(update))
        .route("/api/v1/system/upgrade", post(upgrade))
        .route("/api/v1/image/status", get(image_status))
        .route("/api/v1/image/update", post(image_update))
        .route("/api/v1/image/apply", post(image_apply))
        .route("/api/v1/image/history", get(image_history))
        .route("/api/v1/image/config", get(image_get_config).put(image_save_config))
        .route("/api/v1/ws", get(websocket))
        .with_state(state)
}

/// Serve on TCP or a unix socket until interrupted; drain up to 5s
pub async fn serve(actions: Actions, config: &Config) -> Result<(), ServeError> {
    let state = AppState::new(actions, config.api_token.clone());
    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(config.write_timeout)));

    let shutdown = std::sync::Arc::new(tokio::sync::Notify::new());
    let notify = shutdown.clone();
    let signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        notify.notify_one();
    };

    match &config.unix_socket {
        Some(path) => {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
            let listener = tokio::net::UnixListener::bind(path)?;
            info!("listening on unix socket {}", path.display());
            drain(
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .into_future(),
                &shutdown,
            )
            .await
        }
        None => {
            let listener = tokio::net::TcpListener::bind(&config.address).await?;
            info!("listening on {}", config.address);
            drain(
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .into_future(),
                &shutdown,
            )
            .await
        }
    }
}

async fn drain<F>(server: F, shutdown: &tokio::sync::Notify) -> Result<(), ServeError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    let mut server = pin!(server);

    tokio::select! {
        result = &mut server => Ok(result?),
        _ = shutdown.notified() => {
            if tokio::time::timeout(Duration::from_secs(5), &mut server)
                .await
                .is_err()
            {
                warn!("graceful shutdown timed out, dropping connections");
            }
            Ok(())
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("io")]
    Io(#[from] std::io::Error),
}

// -- shared handler plumbing ----------------------------------------------

/// Transaction id from the `X-Transaction-ID` header or a query/body field
fn transaction_from(headers: &HeaderMap, fallback: Option<String>) -> Option<String> {
    headers
        .get("X-Transaction-ID")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|transaction| !transaction.is_empty())
        .or(fallback.filter(|transaction| !transaction.is_empty()))
}

fn unauthorized() -> HttpResponse {
    let body = json!({
        "data": { "message": "Authentication required" },
        "error": true,
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(body),
    )
        .into_response()
}

/// Map the dispatcher outcome onto the wire
fn respond(result: Result<ApmResponse, ActionError>, background: bool) -> HttpResponse {
    match result {
        Ok(response) => {
            let status = if background && !response.error {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                render_json(&response),
            )
                .into_response()
        }
        Err(err) => {
            if matches!(err, ActionError::Permission(_)) {
                return unauthorized();
            }
            let status =
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = json!({
                "data": { "message": tui::pretty::sentence_case(&err.to_string()) },
                "error": true,
            });
            (status, Json(body)).into_response()
        }
    }
}

macro_rules! grant {
    ($state:expr, $headers:expr, $permission:expr) => {
        match auth::authorize($state.token.as_deref(), &$headers, $permission) {
            Ok(grant) => grant,
            Err(auth::Denied) => return unauthorized(),
        }
    };
}

// -- meta -------------------------------------------------------------------

async fn health() -> HttpResponse {
    Json(json!({ "status": "ok", "version": environment::VERSION })).into_response()
}

async fn meta() -> HttpResponse {
    let modules: Vec<&str> = {
        let mut tags: Vec<&str> = endpoints::ENDPOINTS
            .iter()
            .flat_map(|endpoint| endpoint.tags.iter().copied())
            .collect();
        tags.sort_unstable();
        tags.dedup();
        tags
    };

    Json(json!({
        "name": environment::NAME,
        "version": environment::VERSION,
        "modules": modules,
        "docs": "/api/v1/docs",
    }))
    .into_response()
}

async fn openapi_json() -> HttpResponse {
    Json(openapi::document()).into_response()
}

const SWAGGER_PAGE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <title>APM API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => SwaggerUIBundle({
      url: "/api/v1/openapi.json",
      dom_id: "#swagger-ui",
    });
  </script>
</body>
</html>
"##;

async fn docs() -> Html<&'static str> {
    Html(SWAGGER_PAGE)
}

// -- packages ---------------------------------------------------------------

async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);

    // filters accept both repeated and comma-joined forms
    let pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(raw.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();

    let value = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };
    let filters: Vec<String> = pairs
        .iter()
        .filter(|(name, _)| name == "filters")
        .flat_map(|(_, value)| value.split(','))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect();

    let params = ListParams {
        filters,
        sort: value("sort"),
        order: value("order"),
        limit: value("limit").and_then(|limit| limit.parse().ok()),
        offset: value("offset").and_then(|offset| offset.parse().ok()),
        force_update: value("forceUpdate")
            .map(|force| matches!(force.as_str(), "true" | "1"))
            .unwrap_or(false),
    };

    let ctx = Context::service(transaction_from(&headers, value("transaction")), false, grant.manage);
    respond(state.actions.list(ctx, params).await, false)
}

#[derive(Deserialize)]
struct InfoQuery {
    #[serde(default)]
    full: bool,
    transaction: Option<String>,
}

async fn info_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<InfoQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, query.transaction), false, grant.manage);
    respond(state.actions.info(ctx, name, query.full).await, false)
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    installed: bool,
    transaction: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, query.transaction), false, grant.manage);
    respond(
        state.actions.search(ctx, query.q, query.installed).await,
        false,
    )
}

async fn filter_fields(State(state): State<AppState>, headers: HeaderMap) -> HttpResponse {
    let _grant = grant!(state, headers, Permission::Read);
    respond(Ok(state.actions.get_filter_fields()), false)
}

#[derive(Deserialize)]
struct InstallBody {
    packages: Vec<String>,
    #[serde(default)]
    background: bool,
    transaction: Option<String>,
}

async fn install(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InstallBody>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, body.transaction),
        body.background,
        grant.manage,
    );
    respond(
        state.actions.install(ctx, body.packages).await,
        body.background,
    )
}

#[derive(Deserialize)]
struct RemoveBody {
    packages: Vec<String>,
    #[serde(default)]
    purge: bool,
    #[serde(default)]
    depends: bool,
    #[serde(default)]
    background: bool,
    transaction: Option<String>,
}

async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RemoveBody>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, body.transaction),
        body.background,
        grant.manage,
    );
    respond(
        state
            .actions
            .remove(ctx, body.packages, body.purge, body.depends)
            .await,
        body.background,
    )
}

#[derive(Deserialize)]
struct PackagesBody {
    packages: Vec<String>,
    transaction: Option<String>,
}

async fn check_install(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PackagesBody>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, body.transaction), false, grant.manage);
    respond(state.actions.check_install(ctx, body.packages).await, false)
}

async fn check_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PackagesBody>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, body.transaction), false, grant.manage);
    respond(state.actions.check_remove(ctx, body.packages).await, false)
}

// -- system -----------------------------------------------------------------

#[derive(Deserialize)]
struct BackgroundQuery {
    #[serde(default)]
    background: bool,
    transaction: Option<String>,
}

async fn check_upgrade(State(state): State<AppState>, headers: HeaderMap) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, None), false, grant.manage);
    respond(state.actions.check_upgrade(ctx).await, false)
}

async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BackgroundQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, query.transaction),
        query.background,
        grant.manage,
    );
    respond(state.actions.update(ctx).await, query.background)
}

async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BackgroundQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, query.transaction),
        query.background,
        grant.manage,
    );
    respond(state.actions.upgrade(ctx).await, query.background)
}

// -- image ------------------------------------------------------------------

async fn image_status(State(state): State<AppState>, headers: HeaderMap) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, None), false, grant.manage);
    respond(state.actions.image_status(ctx).await, false)
}

async fn image_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BackgroundQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, query.transaction),
        query.background,
        grant.manage,
    );
    respond(state.actions.image_update(ctx).await, query.background)
}

async fn image_apply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BackgroundQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(
        transaction_from(&headers, query.transaction),
        query.background,
        grant.manage,
    );
    respond(state.actions.image_apply(ctx).await, query.background)
}

#[derive(Deserialize)]
struct HistoryQuery {
    name: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    transaction: Option<String>,
}

async fn image_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, query.transaction), false, grant.manage);
    respond(
        state
            .actions
            .image_history(ctx, query.name, query.limit, query.offset)
            .await,
        false,
    )
}

async fn image_get_config(State(state): State<AppState>, headers: HeaderMap) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Read);
    let ctx = Context::service(transaction_from(&headers, None), false, grant.manage);
    respond(state.actions.image_get_config(ctx).await, false)
}

async fn image_save_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(config): Json<ImageConfig>,
) -> HttpResponse {
    let grant = grant!(state, headers, Permission::Manage);
    let ctx = Context::service(transaction_from(&headers, None), false, grant.manage);
    respond(state.actions.image_save_config(ctx, config).await, false)
}

// -- events -----------------------------------------------------------------

async fn websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> HttpResponse {
    let _grant = grant!(state, headers, Permission::Read);
    let hub = state.actions.events().hub().clone();
    upgrade.on_upgrade(move |socket| ws::client_loop(socket, hub))
}
