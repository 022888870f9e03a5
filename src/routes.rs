use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

use crate::credential::{CredentialError, CredentialGate, GateView};
use crate::logo::{decode_data_uri, DOWNLOAD_FILENAME};
use crate::models::{
    FormUpdate, ReferenceImage, ReferenceImageError, ServiceOption, StyleDefinition, APP_NAME, APP_TAGLINE,
    COMMON_SERVICES, STYLE_OPTIONS,
};
use crate::orchestrator::{Orchestrator, Session, SessionView, SubmitError};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<Session>>,
    pub gate: Arc<CredentialGate>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credential required")]
    Locked(GateView),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    ReferenceImage(#[from] ReferenceImageError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Locked(view) = self {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "credential required", "credential": view }))).into_response();
        }
        let status = match &self {
            ApiError::Submit(SubmitError::Busy(_)) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/api/options", get(get_options))
        .route("/api/session", get(get_session))
        .route("/api/form", patch(update_form))
        .route("/api/form/services/toggle", post(toggle_service))
        .route("/api/form/reference-image", put(set_reference_image).delete(clear_reference_image))
        .route("/api/generate", post(generate_logo))
        .route("/api/reset", post(reset))
        .route("/api/logo/download", get(download_logo))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_credential));

    Router::new()
        .route("/api/credential", get(get_credential))
        .route("/api/credential/connect", post(connect_credential))
        .merge(gated)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

async fn require_credential(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.gate.is_unlocked() {
        return ApiError::Locked(state.gate.view()).into_response();
    }
    next.run(request).await
}

pub async fn get_credential(State(state): State<AppState>) -> Json<GateView> {
    Json(state.gate.view())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub api_key: String,
}

pub async fn connect_credential(
    State(state): State<AppState>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<GateView>, ApiError> {
    state.gate.connect(&body.api_key)?;
    Ok(Json(state.gate.view()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsView {
    pub app_name: &'static str,
    pub tagline: &'static str,
    pub services: &'static [ServiceOption],
    pub styles: &'static [StyleDefinition],
    pub max_services: usize,
}

pub async fn get_options() -> Json<OptionsView> {
    Json(OptionsView {
        app_name: APP_NAME,
        tagline: APP_TAGLINE,
        services: COMMON_SERVICES,
        styles: STYLE_OPTIONS,
        max_services: crate::models::MAX_SERVICES,
    })
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.read().view())
}

pub async fn update_form(State(state): State<AppState>, Json(body): Json<FormUpdate>) -> Json<SessionView> {
    let mut session = state.session.write();
    session.form.apply(body);
    Json(session.view())
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub service: String,
}

pub async fn toggle_service(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let service = body.service.trim();
    if service.is_empty() {
        return Err(ApiError::BadRequest("service must not be empty".into()));
    }
    let mut session = state.session.write();
    if !session.form.toggle_service(service) {
        tracing::info!("Service '{}' ignored, {} already selected", service, session.form.services.len());
    }
    Ok(Json(session.view()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImageUpload {
    /// Base64 payload or a full data URI.
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

pub async fn set_reference_image(
    State(state): State<AppState>,
    Json(body): Json<ReferenceImageUpload>,
) -> Result<Json<SessionView>, ApiError> {
    let image = ReferenceImage::from_encoded(&body.data, body.mime_type.as_deref())?;
    tracing::info!("📎 Reference image attached ({}, {} bytes)", image.mime_type, image.data.len());
    let mut session = state.session.write();
    session.form.set_reference_image(image);
    Ok(Json(session.view()))
}

pub async fn clear_reference_image(State(state): State<AppState>) -> Json<SessionView> {
    let mut session = state.session.write();
    session.form.clear_reference_image();
    Json(session.view())
}

#[axum::debug_handler]
pub async fn generate_logo(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.orchestrator
        .clone()
        .submit(state.session.clone(), state.gate.clone())
        .await?;
    Ok(Json(state.session.read().view()))
}

pub async fn reset(State(state): State<AppState>) -> Json<SessionView> {
    let mut session = state.session.write();
    session.reset();
    Json(session.view())
}

pub async fn download_logo(State(state): State<AppState>) -> Result<Response, ApiError> {
    let image_url = state.session.read().result().map(|logo| logo.image_url.clone());
    let image_url = image_url.ok_or_else(|| ApiError::NotFound("no logo has been generated".into()))?;
    let (mime, bytes) = decode_data_uri(&image_url)
        .ok_or_else(|| ApiError::BadRequest("stored logo is not a base64 data URI".into()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        mime.parse().map_err(|_| ApiError::BadRequest(format!("invalid image MIME type '{mime}'")))?,
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", DOWNLOAD_FILENAME)
            .parse()
            .map_err(|_| ApiError::BadRequest("invalid download filename".into()))?,
    );
    Ok((StatusCode::OK, headers, bytes).into_response())
}
