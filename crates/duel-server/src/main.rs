//! Realtime 1-v-1 card-duel session server.
//!
//! # Routes
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|---------------------------------------|
//! | `GET`  | `/ws`                  | WebSocket upgrade for duel sessions    |
//! | `GET`  | `/health`               | Liveness + room/queue counts           |
//! | `GET`  | `/api/rooms`            | Waiting rooms open to join             |
//! | `GET`  | `/api/stats`            | Aggregate match counts                 |
//! | `GET`  | `/api/leaderboard`      | Top 10 players by wins                 |
//! | `GET`  | `/api/matches/recent`   | 20 most recent finished matches        |
//! | `GET`  | `/api/player/{id}`      | Per-player totals                      |

mod background;
mod config;
mod connection;
mod error;
mod http;
mod room;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use config::Config;
use http::AppState;
use room::Registry;
use store::Store;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::load());

    let store = Arc::new(
        Store::open(&config.db_path)
            .await
            .expect("failed to open match-history database"),
    );
    let registry = Arc::new(Registry::new(Arc::clone(&config)));

    tokio::spawn(background::ping_loop(Arc::clone(&registry)));
    tokio::spawn(background::reap_loop(Arc::clone(&registry)));

    let state = AppState {
        registry: Arc::clone(&registry),
        store: Arc::clone(&store),
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .route("/api/rooms", get(http::rooms))
        .route("/api/stats", get(http::stats))
        .route("/api/leaderboard", get(http::leaderboard))
        .route("/api/matches/recent", get(http::recent_matches))
        .route("/api/player/{id}", get(http::player))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "duel server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// `GET /ws` — upgrade to a WebSocket and hand off to [`connection::handle_socket`].
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.registry, state.store))
}
