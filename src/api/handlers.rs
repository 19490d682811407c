//! Request handlers.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info};

use super::AppState;
use crate::error::{Error, Result};
use crate::landmarks::LandmarkVector;
use crate::live::LiveSnapshot;
use crate::search::{CollectionStats, LabelScore, SearchOutcome, SearchParams};
use crate::telemetry;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidInput(_) | Error::Image(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ModelUnavailable | Error::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Store(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self {
            Error::InvalidInput(msg) | Error::NotFound(msg) => msg.clone(),
            Error::Image(e) => format!("Invalid image file: {}", e),
            other => other.to_string(),
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Largest `top_k` a request may ask for.
pub const MAX_TOP_K: usize = 100;

fn check_top_k(top_k: usize) -> Result<usize> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(Error::InvalidInput(format!(
            "top_k must be between 1 and {}",
            MAX_TOP_K
        )));
    }
    Ok(top_k)
}

/// Query parameters of `POST /search` and `POST /search/batch`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub top_k: Option<usize>,
    pub img_weight: Option<f32>,
    pub landmark_weight: Option<f32>,
}

impl SearchQuery {
    fn apply(&self, defaults: SearchParams) -> Result<SearchParams> {
        let params = SearchParams {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            image_weight: self.img_weight.unwrap_or(defaults.image_weight),
            landmark_weight: self.landmark_weight.unwrap_or(defaults.landmark_weight),
        };
        check_top_k(params.top_k)?;
        for (name, w) in [
            ("img_weight", params.image_weight),
            ("landmark_weight", params.landmark_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::InvalidInput(format!(
                    "{} must be between 0 and 1",
                    name
                )));
            }
        }
        Ok(params)
    }
}

/// Body of `POST /recognize/landmarks`.
#[derive(Debug, Deserialize)]
pub struct LandmarkRequest {
    pub vector: Vec<f32>,
    /// Defaults to `search.landmark_top_k` (5)
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecognitionResponse {
    pub predictions: Vec<LabelScore>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
    pub model: Option<String>,
    pub store_available: bool,
    pub collections: Vec<CollectionEntry>,
    pub live_sessions: u64,
    pub uptime: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    pub points: Option<u64>,
}

impl From<CollectionStats> for CollectionEntry {
    fn from(stats: CollectionStats) -> Self {
        Self {
            name: stats.name,
            points: stats.points,
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionCreated {
    session_id: String,
}

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "SignLens",
        "version": crate::VERSION,
        "endpoints": {
            "GET /health": "Service health",
            "GET /metrics": "Prometheus metrics",
            "POST /search": "Upload an image (field 'file', optional 'landmarks') for ranked labels",
            "POST /search/batch": "Upload several images (field 'files')",
            "POST /recognize/landmarks": "Recognise a landmark vector",
            "POST /live/sessions": "Open a live recognition session",
            "POST /live/sessions/{id}/frames": "Push a camera frame",
            "GET /live/sessions/{id}": "Smoothed live predictions",
            "DELETE /live/sessions/{id}": "Close a live session",
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_available = state.search.probe().await;
    let model_loaded = state.search.model_loaded();
    let model = state
        .search
        .embedding()
        .ok()
        .map(|e| e.model_name().to_string());
    let collections = state
        .search
        .collection_stats()
        .await
        .into_iter()
        .map(CollectionEntry::from)
        .collect();

    let status = if model_loaded && store_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: crate::VERSION.to_string(),
        model_loaded,
        model,
        store_available,
        collections,
        live_sessions: state.live.count(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => Error::NotFound("Metrics are disabled".to_string()).into_response(),
    }
}

fn check_image_field(content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(ct) if !ct.starts_with("image/") && ct != "application/octet-stream" => Err(
            Error::InvalidInput("File must be an image".to_string()),
        ),
        _ => Ok(()),
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> Error {
    Error::InvalidInput(format!("Malformed multipart body: {}", e))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    mut multipart: Multipart,
) -> Result<Json<SearchOutcome>> {
    state.search.embedding()?;
    let defaults = SearchParams::single(&state.search.config().search);
    let params = query.apply(defaults)?;
    let landmark_dim = state.search.config().landmark_dim;

    let mut image = None;
    let mut landmarks = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                check_image_field(field.content_type())?;
                image = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            }
            Some("landmarks") => {
                let raw = field.text().await.map_err(multipart_error)?;
                if !raw.trim().is_empty() {
                    landmarks = Some(LandmarkVector::from_json(&raw, landmark_dim)?);
                }
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }
    let image = image.ok_or_else(|| Error::InvalidInput("No file uploaded".to_string()))?;

    let outcome = state.search.search_image(image, landmarks, params).await?;
    telemetry::record_search(
        "image",
        outcome.processing_time_ms / 1000.0,
        outcome.results.len(),
    );
    Ok(Json(outcome))
}

pub async fn search_batch(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    mut multipart: Multipart,
) -> Result<Json<Vec<SearchOutcome>>> {
    state.search.embedding()?;
    let defaults = SearchParams::batch(&state.search.config().search);
    let params = query.apply(defaults)?;

    let mut images = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        if matches!(name.as_deref(), Some("files") | Some("file")) {
            images.push(field.bytes().await.map_err(multipart_error)?.to_vec());
        }
    }
    if images.is_empty() {
        return Err(Error::InvalidInput("No files uploaded".to_string()));
    }

    let outcomes = state.search.search_batch(images, params).await?;
    for outcome in &outcomes {
        telemetry::record_search(
            "batch",
            outcome.processing_time_ms / 1000.0,
            outcome.results.len(),
        );
    }
    Ok(Json(outcomes))
}

pub async fn recognize_landmarks(
    State(state): State<AppState>,
    Json(request): Json<LandmarkRequest>,
) -> Result<Json<RecognitionResponse>> {
    let start = Instant::now();
    let dim = state.search.config().landmark_dim;
    let vector = LandmarkVector::new(request.vector, dim)?;
    let top_k = check_top_k(
        request
            .top_k
            .unwrap_or(state.search.config().search.landmark_top_k),
    )?;

    let predictions = state.search.search_landmarks(vector, top_k).await?;
    let processing_time_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;
    telemetry::record_search("landmark", processing_time_ms / 1000.0, predictions.len());
    Ok(Json(RecognitionResponse {
        predictions,
        processing_time_ms,
    }))
}

pub async fn create_live_session(State(state): State<AppState>) -> Result<Response> {
    let session = state.live.create().await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id().to_string(),
        }),
    )
        .into_response())
}

pub async fn push_live_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<LiveSnapshot>> {
    if body.is_empty() {
        return Err(Error::InvalidInput("Empty frame".to_string()));
    }
    let snapshot = state.live.push_frame(&id, body.to_vec()).await?;
    Ok(Json(snapshot))
}

pub async fn get_live_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LiveSnapshot>> {
    let session = state.live.get(&id).await?;
    Ok(Json(session.snapshot().await))
}

pub async fn close_live_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.live.close(&id).await?;
    info!("Live session {} closed by client", id);
    Ok(StatusCode::NO_CONTENT)
}
