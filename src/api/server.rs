//! HTTP surface of the persistence backend
//!
//! Thin CRUD over a [`ModelStore`]: one training-data blob and one model
//! blob per sport, each replaced wholesale on save.

use super::ModelStore;
use crate::error::{ModelError, StoreError};
use crate::models::{GameRecord, Sport, SportConfig, StoredModel};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

pub type SharedStore = Arc<dyn ModelStore>;

/// Backend error types
#[derive(Debug)]
pub enum ApiError {
    UnknownSport(String),
    NotFound,
    Invalid(String),
    Store(StoreError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::UnknownSport(sport) => (
                StatusCode::NOT_FOUND,
                "unknown_sport",
                format!("Unknown sport: {}", sport),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Nothing saved yet".to_string(),
            ),
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid", msg),
            ApiError::Store(e) => {
                error!("Store failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    e.to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

fn parse_sport(raw: &str) -> Result<Sport, ApiError> {
    raw.parse()
        .map_err(|_: ModelError| ApiError::UnknownSport(raw.to_string()))
}

#[derive(Serialize)]
struct Saved {
    sport: Sport,
    saved: usize,
}

async fn list_sports() -> Json<Vec<&'static SportConfig>> {
    Json(Sport::ALL.iter().map(|s| s.config()).collect())
}

async fn get_training_data(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
) -> Result<Json<Vec<GameRecord>>, ApiError> {
    let sport = parse_sport(&sport)?;
    store
        .fetch_training_rows(sport)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn save_training_data(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
    Json(rows): Json<Vec<GameRecord>>,
) -> Result<Json<Saved>, ApiError> {
    let sport = parse_sport(&sport)?;
    store.save_training_rows(sport, &rows).await?;
    info!("Saved {} training rows for {}", rows.len(), sport);
    Ok(Json(Saved {
        sport,
        saved: rows.len(),
    }))
}

async fn delete_training_data(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    store.delete_training_rows(sport).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_model(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
) -> Result<Json<StoredModel>, ApiError> {
    let sport = parse_sport(&sport)?;
    store
        .fetch_model(sport)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn save_model(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
    Json(model): Json<StoredModel>,
) -> Result<Json<Saved>, ApiError> {
    let sport = parse_sport(&sport)?;
    model
        .model
        .check_shape()
        .map_err(|e| ApiError::Invalid(e.to_string()))?;
    store.save_model(sport, &model).await?;
    info!("Saved model for {}", sport);
    Ok(Json(Saved { sport, saved: 1 }))
}

async fn delete_model(
    State(store): State<SharedStore>,
    Path(sport): Path<String>,
) -> Result<StatusCode, ApiError> {
    let sport = parse_sport(&sport)?;
    store.delete_model(sport).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build the backend routes over `store`
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/api/sports", get(list_sports))
        .route(
            "/api/:sport/training-data",
            get(get_training_data)
                .post(save_training_data)
                .delete(delete_training_data),
        )
        .route(
            "/api/:sport/model",
            get(get_model).post(save_model).delete(delete_model),
        )
        .with_state(store)
}
