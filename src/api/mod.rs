//! HTTP and WebSocket surface of the orderbook.

pub mod auth;
pub mod error;
pub mod orders;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use self::auth::Authenticator;
use crate::notifier::Notifier;
use crate::order::store::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<Notifier>,
    pub auth: Arc<dyn Authenticator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(orders::health))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route(
            "/orders/:id",
            get(orders::get_order)
                .put(orders::fill_order)
                .delete(orders::cancel_order),
        )
        .route("/value-locked/:chain", get(orders::value_locked))
        .route("/ws", get(ws::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listen_addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;
    tracing::info!(%listen_addr, "starting orderbook api");
    axum::serve(listener, router(state))
        .await
        .context("serve api")
}
