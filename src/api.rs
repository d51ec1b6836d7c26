//! REST API server for the receipt ingestion core
//!
//! Thin request layer over [`ReceiptIngestService`]; routing and auth
//! beyond this belong to the deployment in front of it.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{ExtractedReceipt, ReceiptFileHandle, TransactionOverrides};
use crate::service::{CreateFromExtracted, ReceiptIngestService};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ReceiptQuery {
    pub engine: Option<String>,
    pub category: Option<String>,
    pub owner: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FromExtractedRequest {
    pub receipt: ExtractedReceipt,
    pub file: Option<ReceiptFileHandle>,
    #[serde(default)]
    pub overrides: TransactionOverrides,
    pub category_id: Option<Uuid>,
    pub category_hint: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TabularImportRequest {
    pub text: String,
    pub owner: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ReceiptIngestService>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Owner ids arrive as UUIDs or opaque account strings; the latter map to
/// a stable UUID so the same caller always scopes to the same owner.
fn owner_uuid(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string("anonymous-owner"),
    }
}

fn require_body(body: &Bytes) -> Result<(), IngestError> {
    if body.is_empty() {
        Err(IngestError::InvalidInput("empty request body".into()))
    } else {
        Ok(())
    }
}

fn mime_type(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn error_status(error: &IngestError) -> StatusCode {
    match error {
        IngestError::Extraction(_) | IngestError::Timeout { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        IngestError::CategoryNotFound(_) => StatusCode::NOT_FOUND,
        IngestError::CategoryConflict { .. } | IngestError::AlreadyPromoted(_) => {
            StatusCode::CONFLICT
        }
        IngestError::NoValidRecords | IngestError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Endpoints
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Extraction only, no persistence.
async fn extract_receipt(
    State(state): State<ApiState>,
    Query(query): Query<ReceiptQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(e) = require_body(&body) {
        return (error_status(&e), Json(ApiResponse::error(e.to_string())));
    }

    let mime = mime_type(&headers);
    info!(mime_type = %mime, size = body.len(), "Extract request received");

    match state
        .service
        .extract_only(&body, &mime, query.engine.as_deref())
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(ApiResponse::success(receipt))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Full FLOW A: extract, decide, file or degrade.
async fn upload_receipt(
    State(state): State<ApiState>,
    Query(query): Query<ReceiptQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(e) = require_body(&body) {
        return (error_status(&e), Json(ApiResponse::error(e.to_string())));
    }

    let mime = mime_type(&headers);
    let owner = owner_uuid(query.owner.as_deref());
    let filename = query.filename.as_deref().unwrap_or("receipt-upload");

    match state
        .service
        .upload_and_auto_file(
            &body,
            &mime,
            filename,
            query.engine.as_deref(),
            query.category.as_deref(),
            owner,
        )
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Create a transaction from reviewed/extracted data.
async fn create_from_extracted(
    State(state): State<ApiState>,
    Json(request): Json<FromExtractedRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = owner_uuid(request.owner.as_deref());

    let result = state
        .service
        .create_from_extracted(
            CreateFromExtracted {
                receipt: request.receipt,
                file: request.file,
                overrides: request.overrides,
                category_id: request.category_id,
                category_hint: request.category_hint,
            },
            owner,
        )
        .await;

    match result {
        Ok(transaction) => (StatusCode::OK, Json(ApiResponse::success(transaction))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// FLOW B: bulk tabular import.
async fn import_tabular(
    State(state): State<ApiState>,
    Json(request): Json<TabularImportRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let owner = owner_uuid(request.owner.as_deref());

    match state.service.import_tabular(&request.text, owner).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(service: Arc<ReceiptIngestService>) -> Router {
    let state = ApiState { service };

    Router::new()
        .route("/health", get(health))
        .route("/api/receipts/extract", post(extract_receipt))
        .route("/api/receipts/upload", post(upload_receipt))
        .route("/api/transactions/from-extracted", post(create_from_extracted))
        .route("/api/imports/tabular", post(import_tabular))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    service: Arc<ReceiptIngestService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_uuid_is_stable_for_opaque_strings() {
        let a = owner_uuid(Some("household-42"));
        let b = owner_uuid(Some("household-42"));
        let c = owner_uuid(Some("household-43"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn owner_uuid_passes_real_uuids_through() {
        let id = Uuid::new_v4();
        assert_eq!(owner_uuid(Some(&id.to_string())), id);
    }

    #[test]
    fn empty_body_is_rejected_as_invalid_input() {
        let error = require_body(&Bytes::new()).unwrap_err();
        assert!(matches!(error, IngestError::InvalidInput(_)));
        assert_eq!(error_status(&error), StatusCode::BAD_REQUEST);

        assert!(require_body(&Bytes::from_static(b"jpeg")).is_ok());
    }
}
