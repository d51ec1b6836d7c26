//! Offline OCR sidecar adapter
//!
//! Talks to a locally running OCR service over loopback HTTP. Lower
//! accuracy than the cloud engine, but available without network egress,
//! which is why it serves as the fallback.

use crate::error::EngineError;
use crate::models::{EngineKind, RawEngineItem, RawEngineResult};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SIDECAR_URL: &str = "http://127.0.0.1:8089";

pub struct OfflineOcrEngine {
    client: Client,
    base_url: String,
}

impl OfflineOcrEngine {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for OfflineOcrEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SIDECAR_URL.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    store_name: Option<String>,
    date: Option<String>,
    #[serde(default)]
    items: Vec<SidecarItem>,
    subtotal: Option<String>,
    tax: Option<String>,
    total: Option<String>,
    /// Already 0-100 in the sidecar's convention.
    confidence: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct SidecarItem {
    name: String,
    price: Option<String>,
    quantity: Option<f64>,
}

impl From<SidecarResponse> for RawEngineResult {
    fn from(response: SidecarResponse) -> Self {
        RawEngineResult {
            store_name: response.store_name,
            date: response.date,
            items: response
                .items
                .into_iter()
                .map(|item| RawEngineItem {
                    name: item.name,
                    price: item.price,
                    quantity: item.quantity,
                })
                .collect(),
            subtotal: response.subtotal,
            tax: response.tax,
            total: response.total,
            confidence: response.confidence.map(|c| c.min(100)),
        }
    }
}

#[async_trait::async_trait]
impl super::ExtractionEngine for OfflineOcrEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Offline
    }

    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        _hint: Option<&str>,
    ) -> std::result::Result<RawEngineResult, EngineError> {
        if !mime_type.starts_with("image/") && mime_type != "application/pdf" {
            return Err(EngineError::permanent(format!(
                "unsupported mime type: {}",
                mime_type
            )));
        }

        let response = self
            .client
            .post(format!("{}/ocr/receipt", self.base_url))
            .header("Content-Type", mime_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    EngineError::transient(format!("OCR sidecar unreachable: {}", e))
                } else {
                    EngineError::permanent(format!("OCR sidecar request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngineError::transient(format!(
                "OCR sidecar returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::permanent(format!(
                "OCR sidecar rejected request ({}): {}",
                status, body
            )));
        }

        let parsed: SidecarResponse = response
            .json()
            .await
            .map_err(|e| EngineError::permanent(format!("OCR sidecar response unreadable: {}", e)))?;

        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_response_maps_to_raw_result() {
        let json = r#"{
            "store_name": "Hardware Depot",
            "date": "03/02/2024",
            "items": [{"name": "Screws", "price": "2.99", "quantity": 2.0}],
            "total": "5.98",
            "confidence": 57
        }"#;

        let response: SidecarResponse = serde_json::from_str(json).unwrap();
        let raw: RawEngineResult = response.into();

        assert_eq!(raw.store_name.as_deref(), Some("Hardware Depot"));
        assert_eq!(raw.confidence, Some(57));
        assert_eq!(raw.subtotal, None);
        assert_eq!(raw.items[0].quantity, Some(2.0));
    }
}
