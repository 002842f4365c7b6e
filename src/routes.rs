//! HTTP routes over `LogService`

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use blobscope_logs::{
    AppConfig, ConfigUpdate, ExportError, FetchRange, IngestError, LogService, StorageTarget,
};

const EXPORT_BASENAME: &str = "traffic_logs_current";

type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn router(service: Arc<LogService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/data", get(data))
        .route("/data.csv", get(data_csv))
        .route("/data.json", get(data_json))
        .route("/reload", post(reload))
        .route("/config", get(get_config).post(update_config))
        .route("/config/restore", post(restore_config))
        .route("/config/test", post(test_config))
        .with_state(service)
}

/// Config as returned over HTTP; the key itself never leaves the process
#[derive(Debug, Serialize)]
struct ConfigView {
    account: String,
    has_key: bool,
    container: String,
    fetch_range: FetchRange,
    start_utc: Option<String>,
    end_utc: Option<String>,
    max_blobs: usize,
    timezone: String,
    output_dir: String,
    port: u16,
    needs_setup: bool,
}

impl ConfigView {
    fn new(cfg: AppConfig, needs_setup: bool) -> Self {
        Self {
            has_key: !cfg.key.trim().is_empty(),
            account: cfg.account,
            container: cfg.container,
            fetch_range: cfg.fetch_range,
            start_utc: cfg.start_utc,
            end_utc: cfg.end_utc,
            max_blobs: cfg.max_blobs,
            timezone: cfg.timezone,
            output_dir: cfg.output_dir,
            port: cfg.port,
            needs_setup,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DataQuery {
    debug: Option<String>,
}

fn error_response(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(json!({ "ok": false, "error": message.to_string() })),
    )
}

fn ingest_status(err: &IngestError) -> StatusCode {
    match err {
        IngestError::Configuration { .. } => StatusCode::PRECONDITION_FAILED,
        IngestError::Connectivity(_) => StatusCode::BAD_GATEWAY,
        IngestError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn export_error(err: ExportError) -> ApiError {
    let status = match &err {
        ExportError::Ingest(e) => ingest_status(e),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %err, "export failed");
    error_response(status, err)
}

fn attachment(content_type: &'static str, ext: &str, body: String) -> Response {
    let disposition = format!("attachment; filename=\"{EXPORT_BASENAME}.{ext}\"");
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn data(
    State(service): State<Arc<LogService>>,
    Query(query): Query<DataQuery>,
) -> impl IntoResponse {
    let debug = matches!(query.debug.as_deref(), Some("1" | "true"));
    Json(service.data_view(debug).await)
}

async fn data_csv(State(service): State<Arc<LogService>>) -> Result<Response, ApiError> {
    let body = service.export_csv().await.map_err(export_error)?;
    Ok(attachment("text/csv; charset=utf-8", "csv", body))
}

async fn data_json(State(service): State<Arc<LogService>>) -> Result<Response, ApiError> {
    let body = service.export_json().await.map_err(export_error)?;
    Ok(attachment("application/json", "json", body))
}

async fn reload(State(service): State<Arc<LogService>>) -> Result<impl IntoResponse, ApiError> {
    service.reload().await.map(Json).map_err(|e| {
        tracing::warn!(error = %e, "reload failed");
        error_response(ingest_status(&e), e)
    })
}

async fn get_config(State(service): State<Arc<LogService>>) -> Json<ConfigView> {
    Json(ConfigView::new(service.config(), service.needs_setup()))
}

async fn update_config(
    State(service): State<Arc<LogService>>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ConfigView>, ApiError> {
    let cfg = service.update_config(update).map_err(|e| {
        tracing::error!(error = %e, "failed to save configuration");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    })?;
    Ok(Json(ConfigView::new(cfg, false)))
}

async fn restore_config(
    State(service): State<Arc<LogService>>,
) -> Result<Json<ConfigView>, ApiError> {
    let cfg = service.restore_default().map_err(|e| {
        tracing::error!(error = %e, "failed to restore configuration");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    })?;
    Ok(Json(ConfigView::new(cfg, false)))
}

async fn test_config(
    State(service): State<Arc<LogService>>,
    target: Option<Json<StorageTarget>>,
) -> impl IntoResponse {
    Json(service.test_connection(target.map(|Json(t)| t)).await)
}
