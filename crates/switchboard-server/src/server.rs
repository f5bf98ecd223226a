use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use switchboard_engine::Broker;

use crate::connection;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound responses buffered per connection.
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Connections silent for longer than this are dropped.
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_send_queue: 1024,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub config: Arc<ServerConfig>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Returns once the listener is bound.
pub async fn start(config: ServerConfig, broker: Arc<Broker>) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(AppState {
        broker,
        config: Arc::new(config),
    });

    tracing::info!(addr = %local_addr, "switchboard server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        server,
    })
}

/// Handle returned by [`start`]. Keeps the accept loop alive.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections.
    pub async fn shutdown(self) {
        self.server.abort();
        let _ = self.server.await;
        tracing::info!(addr = %self.addr, "switchboard server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    connection::handle_ws_connection(socket, state.broker, state.config).await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.broker.session_count(),
        "tools": state.broker.registry().count(),
    }))
}
