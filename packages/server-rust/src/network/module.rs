//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown signal fires. The
//! split lets the application wire the engine and scheduler between
//! construction and serving.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::Engine;

use super::connection::OutboundFrame;
use super::handlers::{
    health_handler, liveness_handler, readiness_handler, ws_upgrade_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the HTTP/WebSocket server lifecycle.
pub struct NetworkModule {
    engine: Arc<Engine>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Shared shutdown controller, for the scheduler and signal handling.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - `GET /ws` -- game WebSocket upgrade
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = AppState {
            engine: Arc::clone(&self.engine),
            shutdown: Arc::clone(&self.shutdown),
            start_time: Instant::now(),
        };
        let layers = build_http_layers(&self.engine.config.network);

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/ws", get(ws_upgrade_handler))
            .layer(layers)
            .with_state(state)
    }

    /// Binds the TCP listener. Returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let config = &self.engine.config.network;
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!("TCP listener bound to {}:{port}", config.host);
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then drains sockets.
    ///
    /// # Errors
    ///
    /// Returns an error on fatal I/O failure.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called first.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self.listener.expect("start() must be called before serve()");
        let engine = self.engine;
        let shutdown_ctrl = self.shutdown;

        shutdown_ctrl.set_ready();
        info!("serving WebSocket connections");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        // Drain: close frames to everyone, then wait for socket tasks.
        shutdown_ctrl.trigger_shutdown();
        let handles = engine.sockets.drain_all();
        if !handles.is_empty() {
            info!("draining {} sockets", handles.len());
            for handle in &handles {
                let _ = handle.try_send(OutboundFrame::Close(Some(
                    "server shutting down".to_string(),
                )));
            }
        }
        if shutdown_ctrl.wait_for_drain(Duration::from_secs(30)).await {
            info!("all sockets drained");
        } else {
            warn!("drain timeout expired with sockets remaining");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;

    use super::*;

    fn module() -> NetworkModule {
        NetworkModule::new(Engine::for_tests(ServerConfig::default()))
    }

    #[tokio::test]
    async fn new_does_not_bind() {
        assert!(module().listener.is_none());
    }

    #[tokio::test]
    async fn shutdown_controller_is_shared() {
        let m = module();
        assert!(Arc::ptr_eq(&m.shutdown_controller(), &m.shutdown_controller()));
    }

    #[tokio::test]
    async fn build_router_succeeds() {
        let _router = module().build_router();
    }

    #[tokio::test]
    async fn start_binds_os_assigned_port() {
        let mut m = module();
        let port = m.start().await.expect("bind");
        assert!(port > 0);
        assert!(m.listener.is_some());
    }

    #[tokio::test]
    #[should_panic(expected = "start() must be called before serve()")]
    async fn serve_panics_without_start() {
        let _ = module().serve(std::future::pending::<()>()).await;
    }
}
