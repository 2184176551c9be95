//! HTTP control surface sharing the WebSocket port: health and status
//! probes plus a small config API for the extension's options page.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::{ConfigPatch, Settings, APP_NAME};
use crate::hub::Hub;
use crate::ws::ws_handler;

/// What the serve loop should do once the current listener stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Restart,
    Shutdown,
}

/// State shared by every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub control: Arc<watch::Sender<Control>>,
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/config", get(get_config).post(post_config))
        .layer(middleware::from_fn(require_loopback))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Reject anything that did not arrive over the loopback interface.
/// The listener binds 127.0.0.1 already; this also covers proxies and
/// forwarded sockets.
async fn require_loopback(request: Request, next: Next) -> Response {
    let loopback = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().is_loopback())
        .unwrap_or(false);
    if !loopback {
        warn!("rejected request from a non-loopback address");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

/// Liveness probe. Also how a second launch recognizes this service on
/// the port, so the `app` marker stays.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let browsers = state.hub.browsers.summaries().await;
    Json(json!({
        "status": "ok",
        "app": APP_NAME,
        "browsers": browsers,
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let (port, log_level, data_dir) = {
        let settings = state.hub.settings.read().await;
        (
            settings.port,
            settings.log_level.clone(),
            settings.data_dir.display().to_string(),
        )
    };
    let connections = state.hub.connections.count().await;
    let mut connected = Vec::new();
    for id in state.hub.connections.ids().await {
        if let Some(name) = state.hub.browsers.display_name(&id).await {
            connected.push(name);
        }
    }

    Json(json!({
        "status": "ok",
        "app": APP_NAME,
        "version": VERSION,
        "uptimeSeconds": state.hub.uptime_seconds(),
        "port": port,
        "connections": connections,
        "connectedBrowsers": connected,
        "logLevel": log_level,
        "dataFolder": data_dir,
    }))
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let settings = state.hub.settings.read().await;
    Json(config_body(&settings))
}

fn config_body(settings: &Settings) -> Value {
    json!({
        "port": settings.port,
        "dataFolder": settings.data_dir.display().to_string(),
        "logLevel": settings.log_level,
        "maxTabsPerBrowser": settings.max_tabs_per_browser,
        "version": VERSION,
    })
}

async fn post_config(
    State(state): State<AppState>,
    payload: Result<Json<ConfigPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON: {}", rejection.body_text()),
            )
                .into_response();
        }
    };

    // Bare restart request: reply first, bounce the listener after.
    if patch.restart.is_some() {
        let body = {
            let settings = state.hub.settings.read().await;
            json!({"ok": true, "config": config_body(&settings), "restartNeeded": true})
        };
        info!("restart requested through the config API");
        schedule_restart(Arc::clone(&state.control), Duration::from_millis(100));
        return Json(body).into_response();
    }

    let (outcome, new_data_dir, body) = {
        let mut settings = state.hub.settings.write().await;
        let outcome = match settings.apply_patch(&patch) {
            Ok(outcome) => outcome,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("Invalid config: {e}")).into_response();
            }
        };
        if let Err(e) = settings.save() {
            error!(error = %e, "could not persist config");
        }
        let body = json!({
            "ok": true,
            "config": config_body(&settings),
            "restartNeeded": outcome.restart_needed,
        });
        (outcome, settings.data_dir.clone(), body)
    };

    if outcome.data_dir_changed {
        info!(dir = %new_data_dir.display(), "moving data folder");
        if let Err(e) = state.hub.browsers.relocate(&new_data_dir).await {
            error!(error = %e, "could not move browser store");
        }
        if let Err(e) = state.hub.pending.relocate(&new_data_dir).await {
            error!(error = %e, "could not move pending queue");
        }
    }

    if outcome.port_changed {
        info!("port changed, restarting listener");
        schedule_restart(Arc::clone(&state.control), Duration::from_millis(200));
    }

    Json(body).into_response()
}

/// Bounce the serve loop shortly after the reply has gone out.
fn schedule_restart(control: Arc<watch::Sender<Control>>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = control.send(Control::Restart);
    });
}
