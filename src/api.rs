//! HTTP API endpoints.
//!
//! Read-only race queries, plus a token issuer for local development.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::RaceError;
use crate::state::AppState;
use crate::types::{Race, RaceId, RaceSnapshot};

impl IntoResponse for RaceError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "code": self.code(),
            "msg": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub races: usize,
    pub users: usize,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.read().await;
    Json(HealthResponse {
        status: "ok",
        races: db.races.len(),
        users: db.users.len(),
    })
}

/// List the newest waiting races.
///
/// GET /api/races/waiting
pub async fn list_waiting_races(State(state): State<AppState>) -> Json<Vec<Race>> {
    Json(state.list_waiting_races().await)
}

/// Fetch one race with its progress rows.
///
/// GET /api/races/{id}
pub async fn get_race(
    State(state): State<AppState>,
    Path(race_id): Path<RaceId>,
) -> Result<Json<RaceSnapshot>, RaceError> {
    state
        .get_race(&race_id)
        .await
        .map(Json)
        .ok_or(RaceError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct DevTokenRequest {
    pub subject: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DevTokenResponse {
    pub token: String,
}

/// Issue a signed token without an identity provider.
///
/// POST /api/dev/token
///
/// Only routed when TYPERACE_DEV_TOKENS=1.
pub async fn issue_dev_token(
    State(state): State<AppState>,
    Json(req): Json<DevTokenRequest>,
) -> Response {
    let subject = req.subject.trim();
    if subject.is_empty() {
        return RaceError::InvalidArgument("subject must not be empty".to_string())
            .into_response();
    }

    let identity = Identity {
        subject: subject.to_string(),
        name: req.name,
    };
    tracing::info!("Issued dev token for {}", identity.subject);
    (
        StatusCode::OK,
        Json(DevTokenResponse {
            token: state.auth.issue_token(&identity),
        }),
    )
        .into_response()
}
