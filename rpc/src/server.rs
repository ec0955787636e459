//! Axum-based RPC server.

use crate::error::RpcError;
use crate::handlers;
use crate::metrics::GovernanceMetrics;
use agora_governance::GovernanceEngine;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GovernanceEngine>,
    pub metrics: Arc<GovernanceMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<GovernanceEngine>, metrics: Arc<GovernanceMetrics>) -> Self {
        Self { engine, metrics }
    }
}

/// Build the HTTP router for the governance operation set.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/proposals",
            post(handlers::submit_proposal).get(handlers::list_proposals),
        )
        .route("/proposals/:id", get(handlers::get_proposal))
        .route(
            "/proposals/:id/compliance",
            post(handlers::review_compliance).get(handlers::compliance_history),
        )
        .route(
            "/proposals/:id/votes",
            post(handlers::cast_vote).get(handlers::list_votes),
        )
        .route("/proposals/:id/votes/:voter", get(handlers::get_vote))
        .route("/proposals/:id/escrows", get(handlers::list_escrows))
        .route("/proposals/:id/close", post(handlers::close_voting))
        .route("/proposals/:id/execute", post(handlers::execute))
        .route("/proposals/:id/revert", post(handlers::revert))
        .route("/threshold", get(handlers::get_threshold))
        .route("/admin/threshold", put(handlers::set_threshold))
        .with_state(state)
}

pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Server(format!("bind {addr}: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Server(e.to_string()))
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn serve<F>(self, state: AppState, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "RPC server listening");
        axum::serve(self.listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RpcError::Server(e.to_string()))?;
        tracing::info!("RPC server stopped");
        Ok(())
    }
}
