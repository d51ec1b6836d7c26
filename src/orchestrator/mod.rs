//! Extraction orchestrator
//!
//! Selects an engine, retries once with the alternate when the cloud
//! primary fails, normalizes the engine-native result into one
//! [`ExtractedReceipt`] shape, and computes the trust decision. Engine
//! calls run strictly sequentially; the costlier fallback fires only
//! after an observed failure, never speculatively.

use crate::engines::{default_confidence, review_threshold, ExtractionEngine};
use crate::error::{ExtractionFailure, IngestError};
use crate::models::{EngineKind, ExtractedReceipt, RawEngineResult, ReceiptItem};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Formats accepted for engine-reported receipt dates, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Tolerance when checking `total ≈ subtotal + tax`.
const SUM_EPSILON: f64 = 0.05;

/// Strip currency symbols and separators from an engine-reported numeric
/// field. Returns None when nothing numeric remains.
pub fn parse_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub struct ExtractionOrchestrator {
    offline: Arc<dyn ExtractionEngine>,
    cloud: Arc<dyn ExtractionEngine>,
}

impl ExtractionOrchestrator {
    pub fn new(offline: Arc<dyn ExtractionEngine>, cloud: Arc<dyn ExtractionEngine>) -> Self {
        Self { offline, cloud }
    }

    fn engine_for(&self, kind: EngineKind) -> &Arc<dyn ExtractionEngine> {
        match kind {
            EngineKind::Offline => &self.offline,
            EngineKind::Cloud => &self.cloud,
        }
    }

    /// Run extraction with the one-shot fallback policy.
    ///
    /// Cloud primary falling over retries once on the offline engine,
    /// capturing both errors. An offline primary has no better fallback,
    /// so its failure propagates directly. A failed extraction is never
    /// converted into a fabricated success.
    pub async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        engine_hint: Option<&str>,
    ) -> std::result::Result<ExtractedReceipt, ExtractionFailure> {
        let primary_kind = EngineKind::from_hint(engine_hint);

        info!(
            engine = %primary_kind,
            mime_type,
            size_bytes = bytes.len(),
            "Extraction started"
        );

        let primary = self.engine_for(primary_kind);
        let primary_error = match primary.extract(bytes, mime_type, engine_hint).await {
            Ok(raw) => {
                debug!(engine = %primary_kind, "Primary engine succeeded");
                return Ok(self.normalize(raw, primary_kind));
            }
            Err(e) => e,
        };

        warn!(
            engine = %primary_kind,
            error = %primary_error,
            "Primary engine failed"
        );

        if primary_kind == EngineKind::Offline {
            // No better fallback exists below the offline engine.
            return Err(ExtractionFailure {
                primary_engine: primary_kind,
                primary: primary_error,
                secondary_engine: None,
                secondary: None,
            });
        }

        info!(fallback = %EngineKind::Offline, "Fallback triggered");

        match self
            .offline
            .extract(bytes, mime_type, engine_hint)
            .await
        {
            Ok(raw) => {
                debug!(engine = %EngineKind::Offline, "Fallback engine succeeded");
                Ok(self.normalize(raw, EngineKind::Offline))
            }
            Err(secondary_error) => {
                warn!(
                    engine = %EngineKind::Offline,
                    error = %secondary_error,
                    "Fallback engine failed"
                );
                Err(ExtractionFailure {
                    primary_engine: primary_kind,
                    primary: primary_error,
                    secondary_engine: Some(EngineKind::Offline),
                    secondary: Some(secondary_error),
                })
            }
        }
    }

    /// [`extract`](Self::extract) wrapped in a caller-level timeout
    /// covering the whole orchestration, fallback included. If it fires
    /// mid-fallback the in-flight call is abandoned.
    pub async fn extract_with_timeout(
        &self,
        bytes: &[u8],
        mime_type: &str,
        engine_hint: Option<&str>,
        timeout: Duration,
    ) -> crate::Result<ExtractedReceipt> {
        match tokio::time::timeout(timeout, self.extract(bytes, mime_type, engine_hint)).await {
            Ok(result) => result.map_err(IngestError::from),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Extraction timed out");
                Err(IngestError::Timeout {
                    stage: "extraction",
                })
            }
        }
    }

    /// Collapse the engine-native result into the single normalized shape
    /// and compute the review decision.
    fn normalize(&self, raw: RawEngineResult, engine: EngineKind) -> ExtractedReceipt {
        let items: Vec<ReceiptItem> = raw
            .items
            .into_iter()
            .filter_map(|item| {
                let price = item.price.as_deref().and_then(parse_money)?;
                Some(ReceiptItem {
                    name: item.name,
                    price,
                    quantity: item.quantity,
                })
            })
            .collect();

        let subtotal = raw.subtotal.as_deref().and_then(parse_money);
        let tax = raw.tax.as_deref().and_then(parse_money);
        let total = raw.total.as_deref().and_then(parse_money);
        let date = raw.date.as_deref().and_then(parse_receipt_date);

        let confidence_score = raw
            .confidence
            .unwrap_or_else(|| default_confidence(engine))
            .min(100);

        let mut review_reasons = Vec::new();

        let threshold = review_threshold(engine);
        if confidence_score < threshold {
            review_reasons.push(format!(
                "confidence {} below {} engine threshold {}",
                confidence_score, engine, threshold
            ));
        }
        if total.is_none() {
            review_reasons.push("total missing".to_string());
        }
        if date.is_none() {
            review_reasons.push("date missing".to_string());
        }
        if items.is_empty() && total.is_some() {
            review_reasons.push("no line items despite a total".to_string());
        }
        if let (Some(subtotal), Some(tax), Some(total)) = (subtotal, tax, total) {
            if (subtotal + tax - total).abs() > SUM_EPSILON {
                review_reasons.push(format!(
                    "total {:.2} does not match subtotal {:.2} + tax {:.2}",
                    total, subtotal, tax
                ));
            }
        }

        let needs_review = !review_reasons.is_empty();

        info!(
            engine = %engine,
            confidence = confidence_score,
            needs_review,
            reasons = review_reasons.len(),
            "Extraction normalized"
        );

        ExtractedReceipt {
            store_name: raw.store_name,
            date,
            items,
            subtotal,
            tax,
            total,
            confidence_score,
            engine,
            needs_review,
            review_reasons,
        }
    }
}
