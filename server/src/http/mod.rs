//! HTTP surface for submitting commands
//!
//! - `POST /devices/{id}/command` validates the body and publishes it
//! - `GET /health` reports the broker link state

mod error;

pub use error::ApiError;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::command::CommandPublisher;
use cmdrelay_shared::LinkState;

#[derive(Clone)]
struct AppState {
    publisher: Arc<CommandPublisher>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    link: String,
}

pub fn router(publisher: Arc<CommandPublisher>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices/{id}/command", post(send_command))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { publisher })
}

async fn send_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.publisher.submit(&device_id, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let link = state.publisher.link_state();
    let (code, status) = if link == LinkState::Connected {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            link: link.to_string(),
        }),
    )
}
