use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::Application;
use crate::error::VmsError;
use crate::model::{
    AnprPolicy, Camera, CameraId, CameraStatus, GridPosition, ObservedMetadata, RecordingPolicy, User,
};
use crate::store::{AnprEventFilter, MetadataStore, RecordingFilter};

/// Wraps [`VmsError`] for the boundary between the core's error taxonomy and
/// HTTP status codes: NotFound/Conflict/Validation map directly; anything
/// else is a 500 since it should have been absorbed before reaching here.
pub struct ApiError(VmsError);

impl From<VmsError> for ApiError {
    fn from(e: VmsError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VmsError::NotFound(_) => StatusCode::NOT_FOUND,
            VmsError::Conflict(_) => StatusCode::CONFLICT,
            VmsError::Validation(_) => StatusCode::BAD_REQUEST,
            VmsError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            VmsError::Transient(_) | VmsError::Fatal(_) | VmsError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub async fn login(
    State(app): State<Arc<Application>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let user = app.store.get_user_by_email(&req.email).await?;
    if user.password_hash != req.password {
        return Err(VmsError::validation("invalid credentials").into());
    }
    // Placeholder bearer token issuance; real session management is out of
    // scope for this core (see design ledger).
    Ok(Json(TokenResponse {
        token: format!("placeholder-{}", user.id),
    }))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

pub async fn register(
    State(app): State<Arc<Application>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<User>> {
    let user = User {
        id: Uuid::new_v4(),
        email: req.email,
        password_hash: req.password_hash,
        display_name: req.display_name,
        created_at: chrono::Utc::now(),
    };
    app.store.put_user(user.clone()).await?;
    Ok(Json(redact_user(user)))
}

fn redact_user(mut u: User) -> User {
    u.password_hash = "***".to_string();
    u
}

fn redact_camera(mut c: Camera) -> Camera {
    c.stored_secret = None;
    if let Some(user) = &c.username {
        c.username = Some(mask_username(user));
    }
    c
}

fn mask_username(username: &str) -> String {
    if username.len() <= 2 {
        "*".repeat(username.len())
    } else {
        format!("{}***", &username[..1])
    }
}

pub async fn list_cameras(State(app): State<Arc<Application>>) -> ApiResult<Json<Vec<Camera>>> {
    let cameras = app.store.list_cameras().await?;
    Ok(Json(cameras.into_iter().map(redact_camera).collect()))
}

pub async fn get_camera(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<Json<Camera>> {
    let camera = app.store.get_camera(id).await?;
    Ok(Json(redact_camera(camera)))
}

#[derive(Deserialize)]
pub struct CreateCameraRequest {
    pub name: String,
    pub location: Option<String>,
    pub ingress_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub grid: GridPosition,
    pub recording: RecordingPolicy,
    pub anpr: AnprPolicy,
}

pub async fn create_camera(
    State(app): State<Arc<Application>>,
    Json(req): Json<CreateCameraRequest>,
) -> ApiResult<Json<Camera>> {
    let stored_secret = match req.password {
        Some(p) => Some(app.vault.seal(&p)?),
        None => None,
    };

    let camera = Camera {
        id: Uuid::new_v4(),
        name: req.name,
        location: req.location,
        ingress_url: req.ingress_url,
        username: req.username,
        stored_secret,
        tags: req.tags,
        grid: req.grid,
        recording: req.recording,
        anpr: req.anpr,
        status: CameraStatus::Offline,
        last_seen: None,
        observed: ObservedMetadata::default(),
    };
    camera.validate()?;

    app.store.put_camera(camera.clone()).await?;
    app.bus.publish(crate::bus::BusEvent::CameraAdded(camera.clone()));
    app.register_camera(camera.clone());

    Ok(Json(redact_camera(camera)))
}

#[derive(Deserialize)]
pub struct UpdateCameraRequest {
    pub name: String,
    pub location: Option<String>,
    pub ingress_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub grid: GridPosition,
    pub recording: RecordingPolicy,
    pub anpr: AnprPolicy,
}

pub async fn update_camera(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
    Json(req): Json<UpdateCameraRequest>,
) -> ApiResult<Json<Camera>> {
    let existing = app.store.get_camera(id).await?;
    let stored_secret = match req.password {
        Some(p) => Some(app.vault.seal(&p)?),
        None => existing.stored_secret,
    };

    let updated = Camera {
        id,
        name: req.name,
        location: req.location,
        ingress_url: req.ingress_url,
        username: req.username,
        stored_secret,
        tags: req.tags,
        grid: req.grid,
        recording: req.recording,
        anpr: req.anpr,
        status: existing.status,
        last_seen: existing.last_seen,
        observed: existing.observed,
    };
    updated.validate()?;

    app.store.put_camera(updated.clone()).await?;
    app.update_camera(updated.clone()).await?;

    Ok(Json(redact_camera(updated)))
}

pub async fn delete_camera(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<StatusCode> {
    app.deregister_camera(id).await?;
    app.store.delete_camera(id).await?;
    app.bus
        .publish(crate::bus::BusEvent::CameraDeleted { camera_id: id });
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_record(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<Json<serde_json::Value>> {
    let handle = app
        .get_supervisor(id)
        .ok_or_else(|| VmsError::not_found(format!("camera {id}")))?;
    let recording_id = handle.begin_recording().await?;
    Ok(Json(serde_json::json!({ "recording_id": recording_id })))
}

pub async fn stop_record(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<Json<crate::model::Recording>> {
    let handle = app
        .get_supervisor(id)
        .ok_or_else(|| VmsError::not_found(format!("camera {id}")))?;
    let recording = handle.end_recording().await?;
    Ok(Json(recording))
}

pub async fn snapshot(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<Json<serde_json::Value>> {
    let handle = app
        .get_supervisor(id)
        .ok_or_else(|| VmsError::not_found(format!("camera {id}")))?;
    let path = handle.snapshot().await?;
    Ok(Json(serde_json::json!({ "path": path })))
}

pub async fn hls_playlist(
    State(app): State<Arc<Application>>,
    Path(id): Path<CameraId>,
) -> ApiResult<Response> {
    let path = std::path::PathBuf::from(&app.config.storage.data_dir)
        .join("streams")
        .join(id.to_string())
        .join("live")
        .join("index.m3u8");
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| VmsError::not_found("playlist not available"))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

pub async fn hls_segment(
    State(app): State<Arc<Application>>,
    Path((id, segment)): Path<(CameraId, String)>,
) -> ApiResult<Response> {
    if segment.contains("..") || segment.contains('/') {
        return Err(VmsError::validation("invalid segment name").into());
    }
    let path = std::path::PathBuf::from(&app.config.storage.data_dir)
        .join("streams")
        .join(id.to_string())
        .join("live")
        .join(&segment);
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| VmsError::not_found("segment not available"))?;
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp2t"),
            (header::CACHE_CONTROL, "max-age=60"),
        ],
        body,
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct RecordingsQuery {
    pub camera_id: Option<CameraId>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn list_recordings(
    State(app): State<Arc<Application>>,
    Query(q): Query<RecordingsQuery>,
) -> ApiResult<Json<Vec<crate::model::Recording>>> {
    let recordings = app
        .store
        .list_recordings(RecordingFilter {
            camera_id: q.camera_id,
            from: q.from,
            to: q.to,
        })
        .await?;
    Ok(Json(recordings))
}

#[derive(Deserialize)]
pub struct AnprQuery {
    pub camera_id: Option<CameraId>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    pub plate: Option<String>,
}

pub async fn list_anpr_events(
    State(app): State<Arc<Application>>,
    Query(q): Query<AnprQuery>,
) -> ApiResult<Json<Vec<crate::model::AnprEvent>>> {
    let events = app
        .store
        .list_anpr_events(AnprEventFilter {
            camera_id: q.camera_id,
            from: q.from,
            to: q.to,
            plate_contains: q.plate,
        })
        .await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
pub struct TriggerAnprRequest {
    pub camera_id: CameraId,
}

pub async fn trigger_anpr(
    State(app): State<Arc<Application>>,
    Json(req): Json<TriggerAnprRequest>,
) -> ApiResult<StatusCode> {
    app.store.get_camera(req.camera_id).await?;
    app.trigger_anpr(req.camera_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn system_stats(
    State(app): State<Arc<Application>>,
) -> ApiResult<Json<crate::model::SystemStats>> {
    Ok(Json(app.store.system_stats().await?))
}
