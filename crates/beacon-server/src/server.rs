//! `BeaconServer`: public and admin listeners around shared state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use beacon_settings::{BeaconSettings, ServerSettings};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::connection::CloseReason;
use crate::errors::Result;
use crate::handlers;
use crate::health::HealthResponse;
use crate::lifecycle::SubscriptionManager;
use crate::notifier::{self, Notifier};
use crate::proxy::MtaStsProxy;
use crate::registry::TokenRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for public handlers and socket tasks.
#[derive(Clone)]
pub struct AppState {
    /// Subscription lifecycle over this instance's registry.
    pub lifecycle: Arc<SubscriptionManager>,
    /// Cross-instance publisher.
    pub notifier: Arc<dyn Notifier>,
    /// MTA-STS passthrough, `None` when disabled.
    pub mta_sts: Option<Arc<MtaStsProxy>>,
    /// Listener and socket settings.
    pub settings: Arc<ServerSettings>,
    /// Cancelled when the process shuts down.
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
struct AdminState {
    registry: Arc<TokenRegistry>,
    notifier: &'static str,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

/// The beacon relay server.
pub struct BeaconServer {
    state: AppState,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl BeaconServer {
    /// Assemble a server from already-built parts.
    ///
    /// Use this to plug in a notifier that configuration cannot express,
    /// such as a [`MemoryBus`](crate::MemoryBus) shared with other servers.
    pub fn new(
        settings: &BeaconSettings,
        lifecycle: Arc<SubscriptionManager>,
        notifier: Arc<dyn Notifier>,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Result<Self> {
        let mta_sts = if settings.mta_sts.enabled {
            Some(Arc::new(MtaStsProxy::new(&settings.mta_sts)?))
        } else {
            None
        };
        Ok(Self {
            state: AppState {
                lifecycle,
                notifier,
                mta_sts,
                settings: Arc::new(settings.server.clone()),
                shutdown: coordinator.token(),
            },
            coordinator,
            metrics: None,
            start_time: Instant::now(),
        })
    }

    /// Build a server and its configured notifier backend.
    pub async fn from_settings(settings: &BeaconSettings) -> Result<Self> {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let lifecycle = Arc::new(SubscriptionManager::new(Arc::new(TokenRegistry::new())));
        let (notifier, receiver) =
            notifier::from_settings(&settings.notifier, Arc::clone(&lifecycle), coordinator.token())
                .await?;
        if let Some(handle) = receiver {
            coordinator.track(handle);
        }
        info!(backend = notifier.backend(), "notifier ready");
        Self::new(settings, lifecycle, notifier, coordinator)
    }

    /// Serve Prometheus metrics from `handle` on the admin listener.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Public router: every request goes through [`handlers::dispatch`].
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handlers::dispatch)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Admin router: `/health` and `/metrics`.
    pub fn admin_router(&self) -> Router {
        let state = AdminState {
            registry: Arc::clone(self.state.lifecycle.registry()),
            notifier: self.state.notifier.backend(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the public listener and serve it in the background.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> Result<SocketAddr> {
        let settings = &self.state.settings;
        let router = self.router();
        let addr = self
            .spawn_listener("public", &settings.host, settings.port, move |listener, stop| {
                tokio::spawn(async move {
                    let service = router.into_make_service_with_connect_info::<SocketAddr>();
                    if let Err(e) = axum::serve(listener, service)
                        .with_graceful_shutdown(stop.cancelled_owned())
                        .await
                    {
                        error!(error = %e, "public listener failed");
                    }
                })
            })
            .await?;
        Ok(addr)
    }

    /// Bind the admin listener if `server.admin_port` is set.
    pub async fn listen_admin(&self) -> Result<Option<SocketAddr>> {
        let settings = &self.state.settings;
        let Some(port) = settings.admin_port else {
            return Ok(None);
        };
        let router = self.admin_router();
        let addr = self
            .spawn_listener("admin", &settings.host, port, move |listener, stop| {
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(stop.cancelled_owned())
                        .await
                    {
                        error!(error = %e, "admin listener failed");
                    }
                })
            })
            .await?;
        Ok(Some(addr))
    }

    async fn spawn_listener(
        &self,
        name: &'static str,
        host: &str,
        port: u16,
        serve: impl FnOnce(TcpListener, CancellationToken) -> tokio::task::JoinHandle<()>,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        self.coordinator.track(serve(listener, self.coordinator.token()));
        info!(listener = name, %addr, "listening");
        Ok(addr)
    }

    /// Close every subscriber with the shutdown code, then stop listeners
    /// and background tasks.
    pub async fn shutdown_gracefully(&self) {
        let timeout = Duration::from_secs(self.state.settings.shutdown_timeout_secs);
        let registry = self.state.lifecycle.registry();
        let closed = registry.close_all(CloseReason::Shutdown);
        info!(subscribers = closed, "closing subscribers");

        // Socket tasks unregister themselves once their close frame is out.
        let drained = tokio::time::timeout(timeout, async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        if drained.is_err() {
            info!(remaining = registry.len(), "subscribers still open at shutdown");
        }

        self.coordinator.drain(timeout).await;
        info!("shutdown complete");
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Subscription lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<SubscriptionManager> {
        &self.state.lifecycle
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }
}

async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        state.start_time,
        state.registry.len(),
        state.notifier,
    ))
}

async fn metrics_handler(State(state): State<AdminState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
