//! RPC listener module for the metaserver
//!
//! This module owns the network side of the server: the listener address, the
//! axum router, and the lifecycle state machine that sequences listener
//! startup, store connection, schema verification and shutdown.
//!
//! # Architecture
//!
//! - `lifecycle` - `MetaServer`, the INIT → SERVING → STOPPED state machine
//!
//! The catalog RPC methods themselves live outside this crate. Requests under
//! `/rpc/` are refused with `503 Service Unavailable` until the lifecycle has
//! reached `SERVING`, so no handler can observe the store before the catalog
//! schema is verified.
//!
//! # Usage
//!
//! ```rust,ignore
//! use metaserver::server::MetaServer;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = MetaServer::new("/etc/metaserver.toml");
//! if let Err(e) = server.start(10012).await {
//!     server.stop().await;
//!     return Err(e.into());
//! }
//! server.block_until_termination(CancellationToken::new()).await;
//! ```

pub mod lifecycle;

pub use lifecycle::MetaServer;

use crate::database::{CatalogStatus, StoreHandle};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router as AxumRouter,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use tower_http::cors::{Any, CorsLayer};

/// Well-known RPC port of the metaserver
pub const DEFAULT_RPC_PORT: u16 = 10012;

// =============================================================================
// Server Configuration
// =============================================================================

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub address: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the full bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// =============================================================================
// Server State
// =============================================================================

/// Lifecycle state of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Init,
    Listening,
    StoreReady,
    Serving,
    Stopping,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Init => "INIT",
            ServerState::Listening => "LISTENING",
            ServerState::StoreReady => "STORE_READY",
            ServerState::Serving => "SERVING",
            ServerState::Stopping => "STOPPING",
            ServerState::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Point-in-time view of the server, served at `/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: ServerState,

    /// Catalog schema status once the check has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<CatalogStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: ServerState::Init,
            schema: None,
            started_at: None,
        }
    }
}

/// Shared state handed to the axum router
#[derive(Clone)]
pub struct RpcContext {
    pub status: Arc<RwLock<StatusSnapshot>>,

    /// The verified store; only usable by handlers once the state is SERVING
    pub store: Arc<StoreHandle>,
}

impl RpcContext {
    /// Copy of the current status
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_serving(&self) -> bool {
        self.snapshot().state == ServerState::Serving
    }
}

// =============================================================================
// Axum Router Creation
// =============================================================================

/// Create the Axum router for the RPC listener
pub fn create_axum_router(context: RpcContext) -> AxumRouter {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    AxumRouter::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc/*method", any(rpc_handler))
        .layer(cors)
        .with_state(context)
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    snapshot: StatusSnapshot,
    store_connected: bool,
}

/// Lifecycle and schema status
async fn status_handler(State(context): State<RpcContext>) -> Json<StatusResponse> {
    Json(StatusResponse {
        snapshot: context.snapshot(),
        store_connected: context.store.is_connected(),
    })
}

/// Readiness gate in front of the catalog RPC surface
async fn rpc_handler(State(context): State<RpcContext>) -> Response {
    if !context.is_serving() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "catalog is not ready to serve requests",
        )
            .into_response();
    }

    (
        StatusCode::NOT_IMPLEMENTED,
        "catalog methods are provided by the catalog service",
    )
        .into_response()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, DEFAULT_RPC_PORT);
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new().with_address("127.0.0.1").with_port(9000);
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_server_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ServerState::StoreReady).unwrap(),
            "\"STORE_READY\""
        );
        assert_eq!(ServerState::Serving.to_string(), "SERVING");
    }

    #[test]
    fn test_status_snapshot_serialization() {
        let snapshot = StatusSnapshot {
            state: ServerState::Serving,
            schema: Some(CatalogStatus::Ok),
            started_at: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"], "SERVING");
        assert_eq!(value["schema"], "OK");
        assert!(value.get("started_at").is_none());
    }

    #[test]
    fn test_rpc_context_gate() {
        let context = RpcContext {
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
            store: Arc::new(StoreHandle::new()),
        };
        assert!(!context.is_serving());

        if let Ok(mut status) = context.status.write() {
            status.state = ServerState::Serving;
        }
        assert!(context.is_serving());
    }
}
