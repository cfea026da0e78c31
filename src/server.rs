//! HTTP routes over [`RecordService`].
//!
//! - `GET /database` returns the last persisted result.
//! - `GET /process` runs the pipeline and returns the new result.
//!
//! Failures are reported to callers as a generic message; the specific error
//! is logged.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::ErrorKind;
use crate::pipeline::types::RecordSet;
use crate::service::RecordService;

pub type SharedService = Arc<RecordService>;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Serialize)]
pub struct DatabaseResponse {
    pub message: &'static str,
    pub data: RecordSet,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub message: &'static str,
    pub file: String,
    pub data: RecordSet,
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/database", get(get_database))
        .route("/process", get(get_process))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub async fn get_database(
    State(service): State<SharedService>,
) -> Result<Json<DatabaseResponse>, ApiError> {
    match service.fetch_result().await {
        Ok(data) => Ok(Json(DatabaseResponse {
            message: "Database file found",
            data,
        })),
        Err(e) if e.kind() == ErrorKind::NotFound => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Database file not found."})),
        )),
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Error reading database file");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to read database file."})),
            ))
        }
    }
}

pub async fn get_process(
    State(service): State<SharedService>,
) -> Result<Json<ProcessResponse>, ApiError> {
    match service.run_pipeline().await {
        Ok(data) => {
            let file = service
                .store()
                .location()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Json(ProcessResponse {
                message: "Processing complete",
                file,
                data,
            }))
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Error processing files");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to process files."})),
            ))
        }
    }
}

/// Serves the routes on `addr` until Ctrl+C.
pub async fn serve(service: SharedService, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Server listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
