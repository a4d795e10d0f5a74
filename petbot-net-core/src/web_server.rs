use crate::credentials::{Credential, CredentialStore};
use crate::error::HttpError;
use crate::log_ring::{LogEntry, LogRing};
use crate::ota::{self, OtaUpdater};
use crate::state_machine::SessionState;
use crate::supervisor::NetworkHandle;
use crate::traits::{ScanResult, UiAssetProvider, WifiRadio};
use axum::body::{Body, Bytes};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

// The shared state for our web server.
// By using `Arc<dyn Trait>`, we can inject any implementation
// that satisfies the trait bounds.
pub type WebServerState = State<Arc<AppState>>;

pub struct AppState {
    pub radio: Arc<dyn WifiRadio>,
    pub store: Arc<CredentialStore>,
    pub network: NetworkHandle,
    pub logs: LogRing,
    pub frontend: Arc<dyn UiAssetProvider>,
    /// Target of the captive-portal connectivity-check redirects.
    pub portal_url: String,
}

/// Builds the management router. The OTA route is added when an updater is given.
pub fn build_router(state: Arc<AppState>, updater: Option<Arc<OtaUpdater>>) -> Router {
    let router = Router::new()
        .route("/", get(serve_index))
        .route("/logs", get(serve_logs_page))
        .route("/ota", get(serve_ota_page))
        .route("/settings", get(serve_settings_page))
        .route("/assets/main.js", get(serve_script))
        .route("/assets/style.css", get(serve_style))
        .route("/api/log", get(api_log))
        .route("/api/status", get(api_status))
        .route("/api/wifi/scan", get(api_scan_wifi))
        .route("/api/wifi/saved", get(api_saved_wifi))
        .route("/api/wifi/save", post(api_save_wifi))
        .route("/api/wifi/delete", delete(api_delete_wifi))
        .route("/generate_204", get(redirect_to_portal))
        .route("/hotspot-detect.html", get(redirect_to_portal))
        .with_state(state);

    let router = match updater {
        Some(updater) => ota::register_upload_handler(router, updater),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

// --- Server lifecycle ---

/// A running HTTP server task.
pub struct HttpServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), crate::Error>>,
}

impl HttpServer {
    pub async fn start(addr: SocketAddr, router: Router) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tracing::info!(%local_addr, "Web server listening");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| crate::Error::WebServer(e.into()))
        });

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        match self.handle.await {
            Ok(Ok(())) => tracing::info!("Web server stopped"),
            Ok(Err(e)) => tracing::warn!("Web server ended with error: {}", e),
            Err(e) => tracing::warn!("Web server task failed: {}", e),
        }
    }
}

/// Starts the server on first use; later starts are no-ops. Owned by the
/// supervisor so both the station and the portal path can ask for it.
pub struct HttpLauncher {
    bind_addr: SocketAddr,
    router: Router,
    running: Option<HttpServer>,
}

impl HttpLauncher {
    pub fn new(bind_addr: SocketAddr, router: Router) -> Self {
        Self {
            bind_addr,
            router,
            running: None,
        }
    }

    pub async fn ensure_started(&mut self) -> crate::Result<SocketAddr> {
        if let Some(server) = &self.running {
            return Ok(server.local_addr());
        }
        let server = HttpServer::start(self.bind_addr, self.router.clone()).await?;
        let addr = server.local_addr();
        self.running = Some(server);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(HttpServer::local_addr)
    }

    pub async fn stop(&mut self) {
        if let Some(server) = self.running.take() {
            server.stop().await;
        }
    }
}

// --- Route Handlers ---

async fn serve_index(State(state): WebServerState) -> Response {
    serve_asset(&state, "index.html").await
}

async fn serve_logs_page(State(state): WebServerState) -> Response {
    serve_asset(&state, "logs.html").await
}

async fn serve_ota_page(State(state): WebServerState) -> Response {
    serve_asset(&state, "ota.html").await
}

async fn serve_settings_page(State(state): WebServerState) -> Response {
    serve_asset(&state, "settings.html").await
}

async fn serve_script(State(state): WebServerState) -> Response {
    serve_asset(&state, "assets/main.js").await
}

async fn serve_style(State(state): WebServerState) -> Response {
    serve_asset(&state, "assets/style.css").await
}

/// Serves a UI file from the frontend provider.
async fn serve_asset(state: &AppState, path: &str) -> Response {
    match state.frontend.get_asset(path).await {
        Ok((data, mime)) => ([(header::CONTENT_TYPE, mime)], Body::from(data)).into_response(),
        Err(_) => HttpError::NotFound(format!("Asset not found: {}", path)).into_response(),
    }
}

#[derive(Deserialize)]
struct LogQuery {
    since: Option<String>,
}

/// Entries after `since`; a missing or unparsable value reads from the start.
async fn api_log(State(state): WebServerState, Query(q): Query<LogQuery>) -> Json<Vec<LogEntry>> {
    let since = q
        .since
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);
    Json(state.logs.entries_since(since))
}

async fn api_status(State(state): WebServerState) -> Json<SessionState> {
    Json(state.network.session())
}

/// API endpoint to scan for Wi-Fi networks.
async fn api_scan_wifi(State(state): WebServerState) -> Result<Json<Vec<ScanResult>>, HttpError> {
    match state.radio.scan().await {
        Ok(networks) => Ok(Json(networks)),
        Err(e) => Err(HttpError::InternalError(format!("scan failed: {}", e))),
    }
}

#[derive(Serialize)]
struct SavedNetwork {
    ssid: String,
    #[serde(rename = "hasPassword")]
    has_password: bool,
}

async fn api_saved_wifi(State(state): WebServerState) -> Json<Vec<SavedNetwork>> {
    let saved = state
        .store
        .load()
        .await
        .into_iter()
        .map(|c| SavedNetwork {
            ssid: c.ssid().to_string(),
            has_password: c.has_password(),
        })
        .collect();
    Json(saved)
}

#[derive(Deserialize)]
struct SaveRequest {
    ssid: String,
    #[serde(default)]
    password: String,
}

/// Saves a credential and asks the supervisor to retry the station path.
async fn api_save_wifi(State(state): WebServerState, body: Bytes) -> Result<&'static str, HttpError> {
    let req: SaveRequest =
        serde_json::from_slice(&body).map_err(|e| HttpError::BadRequest(format!("invalid JSON: {}", e)))?;
    let credential = Credential::new(req.ssid, req.password).map_err(|e| HttpError::BadRequest(e.to_string()))?;

    let ssid = credential.ssid().to_string();
    state.store.save_or_update(credential).await?;
    tracing::info!(ssid = %ssid, "credential saved");

    if !state.network.request_reconnect() {
        tracing::warn!("network supervisor is not running, reconnect not requested");
    }
    Ok("OK")
}

#[derive(Deserialize)]
struct DeleteQuery {
    ssid: Option<String>,
}

async fn api_delete_wifi(
    State(state): WebServerState,
    Query(q): Query<DeleteQuery>,
) -> Result<&'static str, HttpError> {
    let ssid = q
        .ssid
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HttpError::BadRequest("ssid required".into()))?;
    state.store.delete(&ssid).await?;
    tracing::info!(ssid = %ssid, "credential deleted");
    Ok("OK")
}

/// OS connectivity checks land here while the portal is up.
async fn redirect_to_portal(State(state): WebServerState) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, state.portal_url.clone())]).into_response()
}
