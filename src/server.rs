//! Per-game loopback content servers.
//!
//! Each cached game is served from its own ephemeral port. Starting a key
//! that is already running (or starting) hands back the same URL.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use url::Url;

use crate::error::ServerError;
use crate::game::GameKey;
use crate::sandbox::{self, CONTENT_SECURITY_POLICY, EXTRA_HEADERS};

/// How long `stop` waits for in-flight responses before dropping them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct ServerHandle {
    url: Url,
    /// `None` for overrides, which own no listener
    listener: Option<Listener>,
}

struct Listener {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

type Slot = Arc<OnceCell<ServerHandle>>;

/// Live content servers and overrides, by game key.
#[derive(Default)]
pub struct GameServerRegistry {
    servers: Mutex<HashMap<GameKey, Slot>>,
}

impl GameServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn servers(&self) -> MutexGuard<'_, HashMap<GameKey, Slot>> {
        self.servers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve `root` for `key`, or return the URL it is already served at.
    pub async fn start(&self, key: &GameKey, root: &Path) -> Result<Url, ServerError> {
        let slot = self.servers().entry(key.clone()).or_default().clone();

        let result = slot.get_or_try_init(|| spawn_server(key, root.to_path_buf())).await;
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                let mut servers = self.servers();
                if servers.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot) && !s.initialized()) {
                    servers.remove(key);
                }
                return Err(e);
            }
        };

        let still_registered = self.servers().get(key).is_some_and(|s| Arc::ptr_eq(s, &slot));
        if !still_registered {
            // Stopped while we were starting it.
            if let Some(listener) = &handle.listener {
                listener.shutdown.cancel();
            }
            return Err(ServerError::ListenFailed(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("server for {key} was stopped while starting"),
            )));
        }
        Ok(handle.url.clone())
    }

    /// Shut down the listener for `key`. Overrides and unknown keys are left
    /// alone.
    pub async fn stop(&self, key: &GameKey) {
        let slot = {
            let mut servers = self.servers();
            let is_override = servers
                .get(key)
                .and_then(|s| s.get())
                .is_some_and(|h| h.listener.is_none());
            if is_override {
                tracing::debug!(%key, "Override has no server to stop");
                return;
            }
            servers.remove(key)
        };
        let Some(listener) = slot.as_ref().and_then(|s| s.get()).and_then(|h| h.listener.as_ref()) else {
            return;
        };

        listener.shutdown.cancel();
        let task = listener.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(%key, "Content server did not drain in time, aborting");
                task.abort();
            }
        }
        tracing::info!(%key, addr = %listener.addr, "Content server stopped");
    }

    /// Route `key` to an externally hosted URL instead of a local server.
    pub fn register_override(&self, key: GameKey, url: Url) {
        tracing::info!(%key, %url, "Registered game override");
        let slot = Arc::new(OnceCell::new_with(Some(ServerHandle { url, listener: None })));
        let previous = self.servers().insert(key, slot);
        if let Some(listener) = previous.as_ref().and_then(|s| s.get()).and_then(|h| h.listener.as_ref()) {
            listener.shutdown.cancel();
        }
    }

    /// URL `key` is served at, local or overridden.
    pub fn url(&self, key: &GameKey) -> Option<Url> {
        self.servers().get(key).and_then(|s| s.get()).map(|h| h.url.clone())
    }

    /// Whether `key` points at an external dev server.
    pub fn is_override(&self, key: &GameKey) -> bool {
        self.servers()
            .get(key)
            .and_then(|s| s.get())
            .is_some_and(|h| h.listener.is_none())
    }

    /// Whether a local listener is up for `key`.
    pub fn is_running(&self, key: &GameKey) -> bool {
        self.servers()
            .get(key)
            .and_then(|s| s.get())
            .is_some_and(|h| h.listener.as_ref().is_some_and(|l| !l.shutdown.is_cancelled()))
    }

    /// Stop every local server.
    pub async fn stop_all(&self) {
        let keys: Vec<GameKey> = self.servers().keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
    }
}

fn bind_error(e: io::Error) -> ServerError {
    match e.kind() {
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => ServerError::PortUnavailable(e),
        _ => ServerError::ListenFailed(e),
    }
}

async fn spawn_server(key: &GameKey, root: PathBuf) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.map_err(bind_error)?;
    let addr = listener.local_addr().map_err(ServerError::ListenFailed)?;
    let url = Url::parse(&format!("http://localhost:{}/", addr.port()))
        .map_err(|e| ServerError::ListenFailed(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    tracing::info!(%key, %addr, root = %root.display(), "Starting content server");
    let app = router(root);
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone().cancelled_owned();
    let label = key.to_string();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
            tracing::error!(key = %label, error = %e, "Content server failed");
        }
    });

    Ok(ServerHandle {
        url,
        listener: Some(Listener {
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
        }),
    })
}

fn router(root: PathBuf) -> Router {
    let mut app = Router::new()
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_path))
        .with_state(Arc::new(root))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ));
    for (name, value) in EXTRA_HEADERS {
        app = app.layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }
    app
}

async fn serve_index(State(root): State<Arc<PathBuf>>) -> Response {
    serve_file(root.join("index.html")).await
}

async fn serve_path(State(root): State<Arc<PathBuf>>, UrlPath(path): UrlPath<String>) -> Response {
    match resolve(&root, &path) {
        Some(file) => serve_file(file).await,
        None => {
            tracing::debug!(%path, "Rejected path outside game root");
            not_found()
        }
    }
}

async fn serve_file(mut file: PathBuf) -> Response {
    if tokio::fs::metadata(&file).await.is_ok_and(|m| m.is_dir()) {
        file.push("index.html");
    }
    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::trace!(file = %file.display(), "Not found");
            return not_found();
        }
    };

    let content_type = content_type(&file);
    let body = if content_type == "text/html" {
        sandbox::inject_guard(&String::from_utf8_lossy(&bytes)).into_bytes()
    } else {
        bytes
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "Not Found",
    )
        .into_response()
}

/// Join a request path onto `root`, refusing anything that could climb out.
fn resolve(root: &Path, request: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(request).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
