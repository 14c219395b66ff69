//! Axum router and listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use baton_node::tracing_spans::rpc_span;
use baton_node::{BatonNode, BatonService, BroadcastNotifier, NodeMetrics};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, Instrument};

use crate::error::RpcError;
use crate::handlers;
use crate::ws;

/// State shared by every handler.
#[derive(Clone)]
pub struct RpcState {
    pub service: Arc<BatonService>,
    pub notifier: BroadcastNotifier,
    pub metrics: Arc<NodeMetrics>,
    pub enable_metrics: bool,
}

impl RpcState {
    pub fn from_node(node: &BatonNode) -> Self {
        Self {
            service: node.service(),
            notifier: node.notifier().clone(),
            metrics: node.metrics(),
            enable_metrics: node.config().enable_metrics,
        }
    }
}

/// Build the full HTTP surface.
pub fn router(state: RpcState) -> Router {
    let session = Router::new()
        .route(
            "/sessions/:session_id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/:session_id/end", post(handlers::end_session))
        .route("/sessions/:session_id/enroll", post(handlers::enroll))
        .route("/sessions/:session_id/heartbeat", post(handlers::heartbeat))
        .route("/sessions/:session_id/attendance", get(handlers::attendance))
        .route("/sessions/:session_id/scan-log", get(handlers::scan_log))
        .route("/sessions/:session_id/windows/:kind", put(handlers::set_window))
        .route("/sessions/:session_id/events", get(ws::session_events));

    let chains = Router::new()
        .route("/sessions/:session_id/chains", get(handlers::list_chains))
        .route("/sessions/:session_id/chains/seed", post(handlers::seed_chains))
        .route("/sessions/:session_id/chains/reseed", post(handlers::reseed_chains))
        .route("/sessions/:session_id/chains/:chain_id", get(handlers::get_chain))
        .route(
            "/sessions/:session_id/chains/:chain_id/history",
            get(handlers::chain_history),
        )
        .route(
            "/sessions/:session_id/chains/:chain_id/token",
            get(handlers::current_token),
        )
        .route(
            "/sessions/:session_id/chains/:chain_id/holder",
            put(handlers::set_chain_holder),
        )
        .route(
            "/sessions/:session_id/chains/:chain_id/close",
            post(handlers::close_chain),
        );

    let scans = Router::new()
        .route(
            "/sessions/:session_id/tokens/:token_id/challenge",
            post(handlers::request_challenge),
        )
        .route(
            "/sessions/:session_id/tokens/:token_id/scan",
            post(handlers::chain_scan),
        )
        .route(
            "/sessions/:session_id/tokens/:token_id/standalone",
            post(handlers::standalone_scan),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .merge(session)
        .merge(chains)
        .merge(scans)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_requests))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn trace_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let span = rpc_span(req.method().as_str(), &route);
    let started = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        debug!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request handled"
        )
    });
    response
}

/// A bound HTTP listener ready to serve.
pub struct RpcServer {
    listener: TcpListener,
    state: RpcState,
}

impl RpcServer {
    pub async fn bind(addr: &str, state: RpcState) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Server(format!("failed to bind {addr}: {e}")))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Server(e.to_string()))
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "RPC server listening");
        }
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RpcError::Server(e.to_string()))?;
        info!("RPC server stopped");
        Ok(())
    }
}
