//! Callback server — the HTTP listener the engine calls back into
//!
//! Knows nothing about kinds or procedures: it maps POST routes to opaque
//! handlers and answers health checks.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};

/// Path answered by the health check route
pub const HEALTHCHECK_PATH: &str = "/healthcheck";

/// Opaque POST handler: raw headers and body in, finished response out
pub type RouteHandler = Arc<dyn Fn(HeaderMap, Bytes) -> BoxFuture<'static, Response> + Send + Sync>;

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    // flipped to true once the grace period is over
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// HTTP listener exposing registered callback routes
pub struct CallbackServer {
    bind_address: String,
    body_limit: usize,
    shutdown_timeout: Duration,
    routes: BTreeMap<String, RouteHandler>,
    health_check: bool,
    should_run: bool,
    running: Option<RunningServer>,
}

impl CallbackServer {
    /// Create a server that will bind `config.bind_address()` on start
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            bind_address: config.bind_address(),
            body_limit: config.body_limit_bytes,
            shutdown_timeout: config.shutdown_timeout(),
            routes: BTreeMap::new(),
            health_check: false,
            should_run: false,
            running: None,
        }
    }

    /// Add a POST route; a later registration on the same path replaces the earlier one
    pub fn register_route(&mut self, path: impl Into<String>, handler: RouteHandler) {
        let path = path.into();
        self.should_run = true;
        if let Some(running) = &self.running {
            tracing::warn!(
                route = %path,
                addr = %running.addr,
                "Callback server already running, route will not be served until restart"
            );
        }
        if self.routes.insert(path.clone(), handler).is_some() {
            tracing::warn!(route = %path, "Callback route replaced");
        } else {
            tracing::debug!(route = %path, "Callback route registered");
        }
    }

    /// Add `GET /healthcheck` answering `{"status": "Available"}`
    pub fn register_health_check(&mut self) {
        self.should_run = true;
        self.health_check = true;
    }

    /// Registered POST paths
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn has_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Whether anything was registered that warrants a listener
    pub fn should_run(&self) -> bool {
        self.should_run
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Build the axum router for the current route table.
    pub fn router(&self) -> Router {
        let (_, never) = watch::channel(false);
        self.router_with(never)
    }

    /// Router whose POST handlers are dropped once `cancel` turns true
    fn router_with(&self, cancel: watch::Receiver<bool>) -> Router {
        let mut router = Router::new();
        if self.health_check {
            router = router.route(HEALTHCHECK_PATH, get(health_handler));
        }
        for (path, handler) in &self.routes {
            let handler = Arc::clone(handler);
            let cancel = cancel.clone();
            router = router.route(
                path,
                post(move |headers: HeaderMap, body: Bytes| {
                    let handler = Arc::clone(&handler);
                    let cancel = cancel.clone();
                    async move {
                        tokio::select! {
                            response = handler(headers, body) => response,
                            _ = cancelled(cancel) => {
                                tracing::warn!("Callback handler cut off by shutdown");
                                StatusCode::SERVICE_UNAVAILABLE.into_response()
                            }
                        }
                    }
                }),
            );
        }
        router
            .layer(DefaultBodyLimit::max(self.body_limit))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve in the background.
    ///
    /// Binds at most once; returns `None` when nothing was registered.
    pub async fn start(&mut self) -> Result<Option<SocketAddr>> {
        if let Some(running) = &self.running {
            tracing::warn!(addr = %running.addr, "Callback server already running");
            return Ok(Some(running.addr));
        }
        if !self.should_run {
            tracing::info!("No callback routes registered, callback server not started");
            return Ok(None);
        }

        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|source| ProviderError::Bind {
                address: self.bind_address.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let (cancel, cancel_rx) = watch::channel(false);
        let app = self.router_with(cancel_rx);
        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Callback server error");
            }
        });

        tracing::info!(%addr, routes = self.routes.len(), "Callback server listening");
        self.running = Some(RunningServer {
            addr,
            shutdown,
            cancel,
            handle,
        });
        Ok(Some(addr))
    }

    /// Stop accepting, let in-flight handlers finish within the shutdown
    /// timeout, then drop whatever remains. No-op when not running.
    pub async fn close(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());

        let mut handle = running.handle;
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(_) => tracing::info!(addr = %running.addr, "Callback server stopped"),
            Err(_) => {
                // connections run in their own tasks, so the serve task
                // abort alone would leave their handlers going
                running.cancel.send_replace(true);
                handle.abort();
                tracing::warn!(
                    addr = %running.addr,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Callback server shutdown timed out, aborting in-flight handlers"
                );
            }
        }
    }
}

/// Resolves once `cancel` turns true; never, if its sender is gone first
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cut| *cut).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "Available" })).into_response()
}
