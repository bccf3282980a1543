//! hostbridge server
//!
//! Bridges web pages to host capabilities. Each page reaches its bridge
//! over a WebSocket; host UI runs on separately connected surfaces.

mod auth;
mod clipboard;
mod config;
mod documents;
mod logging;
mod migration_runner;
mod paths;
mod ports;
mod presence;
mod secure_store;
mod state;
mod storage;
mod storage_watch;
mod surface;
mod token_provider;
mod websocket;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use hostbridge_core::{
    AccountTokenProvider, BridgeStatus, Capabilities, Clipboard, SecureValueStore, Unavailable,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::auth_middleware;
use crate::clipboard::CommandClipboard;
use crate::config::Config;
use crate::documents::FileDocuments;
use crate::logging::init_logging;
use crate::paths::DataPaths;
use crate::presence::PresenceCheck;
use crate::secure_store::SealedValueStore;
use crate::state::HostState;
use crate::storage::SqliteStore;
use crate::storage_watch::start_storage_watcher;
use crate::surface::SurfaceHub;
use crate::token_provider::HttpTokenProvider;
use crate::websocket::{
    background_ws_handler, main_ws_handler, port_ws_handler, surface_ws_handler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let paths = DataPaths::resolve(config.data_dir.as_deref())?;
    paths.ensure_dirs()?;
    let logging = init_logging(&paths.log_dir())?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        data_dir = %paths.root().display(),
        auth = config.auth_token.is_some(),
        "Starting hostbridge"
    );

    let storage = Arc::new(SqliteStore::open(&paths.db_path())?);
    let _storage_watcher = start_storage_watcher(storage.clone(), &paths.db_path())?;
    let surfaces = Arc::new(SurfaceHub::new(config.surface_command.clone()));
    let capabilities = host_capabilities(&config, &paths, storage, surfaces.clone());

    let state = HostState::new(capabilities, surfaces);
    let app = build_router(state.clone(), config.auth_token.clone());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %config.bind,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    info!(
        component = "server",
        event = "server.stopped",
        "hostbridge stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until killed.
        std::future::pending::<()>().await;
    }
}

/// Wire configured capabilities, falling back to [`Unavailable`] for the
/// ones that need a command or endpoint that was not given.
fn host_capabilities(
    config: &Config,
    paths: &DataPaths,
    storage: Arc<SqliteStore>,
    surfaces: Arc<SurfaceHub>,
) -> Capabilities {
    let clipboard: Arc<dyn Clipboard> = match &config.clipboard_command {
        Some(command) => Arc::new(CommandClipboard::new(command.clone())),
        None => Arc::new(Unavailable("clipboard")),
    };
    let secure_store: Arc<dyn SecureValueStore> = match &config.presence_command {
        Some(command) => Arc::new(SealedValueStore::new(
            paths.secure_key_path(),
            paths.secure_value_path(),
            PresenceCheck::new(command.clone(), config.presence_timeout()),
        )),
        None => Arc::new(Unavailable("secure value storage")),
    };
    let tokens: Arc<dyn AccountTokenProvider> = match &config.token_endpoint {
        Some(endpoint) => Arc::new(HttpTokenProvider::new(endpoint.clone())),
        None => Arc::new(Unavailable("account tokens")),
    };

    Capabilities {
        storage,
        clipboard,
        secure_store,
        tokens,
        documents: Arc::new(FileDocuments::new(paths.downloads_dir())),
        launcher: surfaces,
    }
}

fn build_router(state: HostState, auth_token: Option<String>) -> Router {
    let router = Router::new()
        .route("/ws/main", get(main_ws_handler))
        .route("/ws/background", get(background_ws_handler))
        .route("/ws/port/{id}", get(port_ws_handler))
        .route("/ws/surface", get(surface_ws_handler))
        .route("/status", get(status_handler))
        .route("/background/stop", post(stop_background_handler))
        .route("/commands/{id}", post(command_handler))
        .route("/health", get(health_handler));

    let router = match auth_token {
        Some(token) => router.layer(middleware::from_fn_with_state(token, auth_middleware)),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    main: BridgeStatus,
    background: Option<BridgeStatus>,
    flow_active: bool,
    surfaces: usize,
    ports_waiting: usize,
}

async fn status_handler(State(state): State<HostState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        main: (*state.main.status()).clone(),
        background: state
            .background
            .bridge()
            .map(|bridge| (*bridge.status()).clone()),
        flow_active: state.arbiter.is_active(),
        surfaces: state.surfaces.connected(),
        ports_waiting: state.ports.len(),
    })
}

#[derive(Debug, Serialize)]
struct StopResponse {
    stopped: bool,
}

async fn stop_background_handler(State(state): State<HostState>) -> Json<StopResponse> {
    let stopped = state.background.stop();
    info!(
        component = "server",
        event = "background.stop_requested",
        stopped = stopped,
        "Background stop requested"
    );
    Json(StopResponse { stopped })
}

async fn command_handler(
    State(state): State<HostState>,
    Path(command_id): Path<String>,
) -> StatusCode {
    info!(
        component = "server",
        event = "host_command.received",
        command_id = %command_id,
        "Host command received"
    );
    state.main.host_command(command_id);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    struct TestServer {
        base: String,
        state: HostState,
        _tmp: tempfile::TempDir,
    }

    async fn serve(auth_token: Option<&str>) -> TestServer {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(tmp.path())).unwrap();
        paths.ensure_dirs().unwrap();
        let config = Config::try_parse_from(["hostbridge"]).unwrap();
        let storage = Arc::new(SqliteStore::open(&paths.db_path()).unwrap());
        let surfaces = Arc::new(SurfaceHub::new(None));
        let state = HostState::new(
            host_capabilities(&config, &paths, storage, surfaces.clone()),
            surfaces,
        );

        let app = build_router(state.clone(), auth_token.map(str::to_string));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            state,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn health_is_open_even_with_auth() {
        let server = serve(Some("s3cret")).await;
        let body = reqwest::get(format!("{}/health", server.base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn status_requires_token_when_configured() {
        let server = serve(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let denied = client
            .get(format!("{}/status", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let status: Value = client
            .get(format!("{}/status", server.base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["main"]["role"], "main");
        assert_eq!(status["main"]["channel_ready"], false);
        assert_eq!(status["background"], Value::Null);
    }

    #[tokio::test]
    async fn host_command_starts_background_and_stop_ends_it() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let accepted = client
            .post(format!("{}/commands/lock", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);

        let mut running = false;
        for _ in 0..200 {
            if server.state.background.is_running() {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(running, "background never started");

        let stopped: Value = client
            .post(format!("{}/background/stop", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["stopped"], true);
        assert!(!server.state.background.is_running());
    }
}
