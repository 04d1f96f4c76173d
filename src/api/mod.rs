//! Inbound HTTP routes for each role.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::controller::{
    GatewayController, PullerController, ReceiverController, SenderController, StageController,
};
use crate::error::RelayError;
use crate::job::Job;
use crate::transport::{HEADER_FILE_NAME, HEADER_JOB_ID};

/// Largest request body accepted, sized for raw instrument images.
pub const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Rejected request");
        }
        (status, Json(ApiResponse::failure(self.to_string()))).into_response()
    }
}

type ApiResult = Result<Json<ApiResponse>, RelayError>;

/// The controller behind a running service.
#[derive(Clone)]
pub enum RoleController {
    Sender(Arc<SenderController>),
    Receiver(Arc<ReceiverController>),
    Gateway(Arc<GatewayController>),
    Puller(Arc<PullerController>),
}

impl RoleController {
    pub fn stage(&self) -> Arc<dyn StageController> {
        match self {
            RoleController::Sender(c) => c.clone(),
            RoleController::Receiver(c) => c.clone(),
            RoleController::Gateway(c) => c.clone(),
            RoleController::Puller(c) => c.clone(),
        }
    }

    pub fn router(&self) -> Router {
        match self {
            RoleController::Sender(c) => sender_router(c.clone()),
            RoleController::Receiver(c) => receiver_router(c.clone()),
            RoleController::Gateway(c) => gateway_router(c.clone()),
            RoleController::Puller(c) => puller_router(c.clone()),
        }
    }
}

pub fn sender_router(controller: Arc<SenderController>) -> Router {
    let router = Router::new()
        .route("/api/v1/dataToHandle", post(sender_data_to_handle))
        .route("/api/v1/retry", post(retry::<SenderController>))
        .with_state(controller);
    with_layers(router)
}

pub fn receiver_router(controller: Arc<ReceiverController>) -> Router {
    let router = Router::new()
        .route("/api/v1/transmitJob", post(receiver_transmit_job))
        .route("/api/v1/transmitFile", post(receiver_transmit_file))
        .route("/api/v1/retry", post(retry::<ReceiverController>))
        .with_state(controller);
    with_layers(router)
}

pub fn gateway_router(controller: Arc<GatewayController>) -> Router {
    let router = Router::new()
        .route("/api/v1/dataToHandle", post(gateway_data_to_handle))
        .route("/api/v1/transmitFile/:jobid/:fileid", get(gateway_transmit_file))
        .route("/api/v1/archiveFile/:jobid", post(gateway_archive_file))
        .route("/api/v1/retry", post(retry::<GatewayController>))
        .with_state(controller);
    with_layers(router)
}

pub fn puller_router(controller: Arc<PullerController>) -> Router {
    let router = Router::new()
        .route("/api/v1/dataToHandle", post(puller_data_to_handle))
        .route("/api/v1/retry", post(retry::<PullerController>))
        .with_state(controller);
    with_layers(router)
}

fn with_layers(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn parse_job(body: &[u8]) -> Result<Job, RelayError> {
    serde_json::from_slice(body)
        .map_err(|e| RelayError::validation(format!("failed to decode job: {}", e)))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, RelayError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RelayError::validation(format!("missing {} header", name)))
}

/// A failed retry pass is always a server error, whatever the collected
/// errors are.
async fn retry<C: StageController + 'static>(State(controller): State<Arc<C>>) -> Response {
    tracing::debug!(owner = %controller.owner(), "Retry endpoint called");
    match controller.retry_on_startup().await {
        Ok(()) => Json(ApiResponse::ok()).into_response(),
        Err(e) => {
            tracing::error!(owner = %controller.owner(), error = %e, "Retry pass failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failure(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn sender_data_to_handle(
    State(controller): State<Arc<SenderController>>,
    body: Bytes,
) -> ApiResult {
    let job = parse_job(&body)?;
    controller.handle_job(job).await?;
    Ok(Json(ApiResponse::ok()))
}

async fn receiver_transmit_job(
    State(controller): State<Arc<ReceiverController>>,
    body: Bytes,
) -> ApiResult {
    let job = parse_job(&body)?;
    controller.transmit_job(job).await?;
    Ok(Json(ApiResponse::ok()))
}

async fn receiver_transmit_file(
    State(controller): State<Arc<ReceiverController>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let job_id = required_header(&headers, HEADER_JOB_ID)?;
    let file_name = required_header(&headers, HEADER_FILE_NAME)?;
    controller.transmit_file(job_id, file_name, &body).await?;
    Ok(Json(ApiResponse::ok()))
}

async fn gateway_data_to_handle(
    State(controller): State<Arc<GatewayController>>,
    body: Bytes,
) -> ApiResult {
    let job = parse_job(&body)?;
    controller.handle_job(job).await?;
    Ok(Json(ApiResponse::ok()))
}

async fn gateway_transmit_file(
    State(controller): State<Arc<GatewayController>>,
    Path((job_id, file_id)): Path<(String, String)>,
) -> Result<Response, RelayError> {
    let index: usize = file_id
        .parse()
        .map_err(|_| RelayError::validation(format!("invalid file id: {}", file_id)))?;
    let bytes = controller.fetch_file(&job_id, index).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

async fn gateway_archive_file(
    State(controller): State<Arc<GatewayController>>,
    Path(job_id): Path<String>,
) -> ApiResult {
    controller.archive(&job_id).await?;
    Ok(Json(ApiResponse::ok()))
}

/// Claims the job before answering; the pull itself runs in the background
/// so the gateway is not held open for the whole transfer.
async fn puller_data_to_handle(
    State(controller): State<Arc<PullerController>>,
    body: Bytes,
) -> ApiResult {
    let job = parse_job(&body)?;
    let claimed = controller.accept(job).await?;

    tokio::spawn(async move {
        let job_id = claimed.id.clone();
        if let Err(e) = controller.pull(claimed).await {
            tracing::error!(job_id = %job_id, error = %e, "Output file pull failed");
        }
    });
    Ok(Json(ApiResponse::ok()))
}
