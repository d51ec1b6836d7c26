//! Cloud document-vision engine adapter
//!
//! The cloud engine does not accept inline payloads; bytes are staged in
//! the blob store's temp area first and the request carries the storage
//! ref. That request shaping stays inside this adapter, as does the cloud
//! API's own field naming (vendor / ocrConfidence / lineItems).

use crate::error::EngineError;
use crate::models::{EngineKind, RawEngineItem, RawEngineResult};
use crate::stores::BlobStore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUPPORTED_MIME_PREFIXES: &[&str] = &["image/", "application/pdf"];

pub struct CloudVisionEngine {
    client: Client,
    api_key: String,
    base_url: String,
    staging: Arc<dyn BlobStore>,
}

impl CloudVisionEngine {
    pub fn new(base_url: String, api_key: String, staging: Arc<dyn BlobStore>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            staging,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudRequest<'a> {
    document_ref: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudResponse {
    vendor: Option<String>,
    purchase_date: Option<String>,
    #[serde(default)]
    line_items: Vec<CloudLineItem>,
    sub_total: Option<String>,
    tax_amount: Option<String>,
    total_amount: Option<String>,
    /// 0.0-1.0 in the cloud API's convention.
    ocr_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudLineItem {
    description: String,
    amount: Option<String>,
    qty: Option<f64>,
}

impl From<CloudResponse> for RawEngineResult {
    fn from(response: CloudResponse) -> Self {
        RawEngineResult {
            store_name: response.vendor,
            date: response.purchase_date,
            items: response
                .line_items
                .into_iter()
                .map(|item| RawEngineItem {
                    name: item.description,
                    price: item.amount,
                    quantity: item.qty,
                })
                .collect(),
            subtotal: response.sub_total,
            tax: response.tax_amount,
            total: response.total_amount,
            confidence: response
                .ocr_confidence
                .map(|c| (c * 100.0).round().clamp(0.0, 100.0) as u8),
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> EngineError {
    if error.is_timeout() || error.is_connect() {
        EngineError::transient(format!("cloud engine unreachable: {}", error))
    } else {
        EngineError::permanent(format!("cloud engine request failed: {}", error))
    }
}

#[async_trait::async_trait]
impl super::ExtractionEngine for CloudVisionEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Cloud
    }

    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        hint: Option<&str>,
    ) -> std::result::Result<RawEngineResult, EngineError> {
        if !SUPPORTED_MIME_PREFIXES.iter().any(|p| mime_type.starts_with(p)) {
            return Err(EngineError::permanent(format!(
                "unsupported mime type: {}",
                mime_type
            )));
        }
        if self.api_key.is_empty() {
            return Err(EngineError::permanent("cloud engine API key not configured"));
        }

        // Stage the payload; the cloud API pulls it by ref.
        let staged = self
            .staging
            .write_temp(bytes, "cloud-staging")
            .await
            .map_err(|e| EngineError::transient(format!("staging write failed: {}", e)))?;

        debug!(storage_ref = %staged.storage_ref, "Cloud engine payload staged");

        let request = CloudRequest {
            document_ref: &staged.storage_ref,
            mime_type,
            hint,
        };

        let result = self
            .client
            .post(format!("{}/v1/receipts:extract", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await;

        // The staged copy is only needed for the call itself.
        if let Err(e) = self.staging.delete(&staged.storage_ref).await {
            warn!(storage_ref = %staged.storage_ref, error = %e, "Failed to delete staged payload");
        }

        let response = result.map_err(classify_transport_error)?;
        let status = response.status();

        if status.is_server_error() {
            return Err(EngineError::transient(format!(
                "cloud engine returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::permanent(format!(
                "cloud engine rejected request ({}): {}",
                status, body
            )));
        }

        let parsed: CloudResponse = response
            .json()
            .await
            .map_err(|e| EngineError::permanent(format!("cloud engine response unreadable: {}", e)))?;

        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_response_collapses_to_the_normalized_raw_shape() {
        let json = r#"{
            "vendor": "Corner Market",
            "purchaseDate": "2024-03-02",
            "lineItems": [
                {"description": "Milk", "amount": "$3.49", "qty": 1.0}
            ],
            "subTotal": "$3.49",
            "taxAmount": "$0.28",
            "totalAmount": "$3.77",
            "ocrConfidence": 0.934
        }"#;

        let response: CloudResponse = serde_json::from_str(json).unwrap();
        let raw: RawEngineResult = response.into();

        assert_eq!(raw.store_name.as_deref(), Some("Corner Market"));
        assert_eq!(raw.items.len(), 1);
        assert_eq!(raw.items[0].name, "Milk");
        assert_eq!(raw.total.as_deref(), Some("$3.77"));
        assert_eq!(raw.confidence, Some(93));
    }

    #[test]
    fn missing_confidence_stays_none() {
        let response: CloudResponse = serde_json::from_str(r#"{"vendor": "X"}"#).unwrap();
        let raw: RawEngineResult = response.into();
        assert_eq!(raw.confidence, None);
    }
}
