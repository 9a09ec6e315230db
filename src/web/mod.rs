//! Web layer: thin HTTP surface over the core operations.
//!
//! Two endpoints under a versioned namespace — one to list due events, one
//! to run a specific event — plus a health check. Handlers contain no
//! logic of their own; they delegate to the store and the execution entry
//! point and map errors to status codes.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{config::WebConfig, events::Events, store::JobStore};

pub mod api;

/// Path prefix shared by all endpoints
pub const REST_PREFIX: &str = "api";
/// Versioned namespace under the prefix
pub const API_NAMESPACE: &str = "cron-fleet/v1";
/// Suffix of the due-events listing endpoint
pub const ENDPOINT_LIST: &str = "events";
/// Suffix of the run endpoint
pub const ENDPOINT_RUN: &str = "event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    List,
    Run,
}

/// Whether a resolved request path targets one of our endpoints. A pure
/// function of the path against the namespace/suffix pair.
pub fn is_endpoint_request(path: &str, kind: EndpointKind) -> bool {
    let suffix = match kind {
        EndpointKind::List => ENDPOINT_LIST,
        EndpointKind::Run => ENDPOINT_RUN,
    };
    let expected = format!("{REST_PREFIX}/{API_NAMESPACE}/{suffix}");
    path.trim_matches('/') == expected
}

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub events: Events,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, store: JobStore, events: Events) -> Result<Self> {
        let app = router(AppState { store, events });
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self { app, addr })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

/// Build the router; exposed separately so tests can drive it in-process
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route(
            &format!("/{REST_PREFIX}/{API_NAMESPACE}/{ENDPOINT_LIST}"),
            post(api::list_events),
        )
        .route(
            &format!("/{REST_PREFIX}/{API_NAMESPACE}/{ENDPOINT_RUN}"),
            post(api::run_event),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
