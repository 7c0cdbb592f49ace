//! Read-only HTTP surface: health, active rooms, and match-history stats.
//! None of these handlers mutate the registry or the store.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::room::Registry;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<Store>,
    pub started_at: Instant,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    rooms: usize,
    queue_length: usize,
    uptime: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        rooms: state.registry.room_count().await,
        queue_length: state.registry.queue_len().await,
        uptime: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WaitingRoom {
    code: String,
    host_name: String,
    host_deck_id: String,
    created_at: u64,
    players_count: usize,
}

pub async fn rooms(State(state): State<AppState>) -> Json<Vec<WaitingRoom>> {
    let summaries = state.registry.waiting_rooms().await;
    Json(
        summaries
            .into_iter()
            .map(|s| WaitingRoom {
                code: s.code,
                host_name: s.host_name,
                host_deck_id: s.host_deck_id,
                created_at: s.created_at,
                players_count: s.players_count,
            })
            .collect(),
    )
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(s) => Json(s).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read stats");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.leaderboard().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read leaderboard");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn recent_matches(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.recent_matches().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read recent matches");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn player(State(state): State<AppState>, Path(player_id): Path<String>) -> impl IntoResponse {
    match state.store.player(&player_id).await {
        Ok(Some(p)) => Json(p).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read player stats");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
