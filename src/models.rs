//! Core data models for receipt ingestion and tabular import

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Engines =================
//

/// Closed set of extraction engines. Selection always goes through this
/// enum, never through comparing adapter object identities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Offline,
    Cloud,
}

impl EngineKind {
    /// Parse a caller-supplied hint. Unknown or missing hints select the
    /// cloud engine, which claims the better baseline accuracy.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_lowercase()).as_deref() {
            Some("offline") | Some("local") => EngineKind::Offline,
            _ => EngineKind::Cloud,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineKind::Offline => "offline",
            EngineKind::Cloud => "cloud",
        };
        write!(f, "{}", s)
    }
}

/// Engine-native extraction output, before normalization. Numeric fields
/// stay raw strings here because engines return them with currency symbols
/// and locale separators attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEngineResult {
    pub store_name: Option<String>,
    pub date: Option<String>,
    pub items: Vec<RawEngineItem>,
    pub subtotal: Option<String>,
    pub tax: Option<String>,
    pub total: Option<String>,
    /// 0-100 when the engine reports one; adapters leave this None when
    /// the engine omits confidence.
    pub confidence: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEngineItem {
    pub name: String,
    pub price: Option<String>,
    pub quantity: Option<f64>,
}

//
// ================= Extracted Receipt =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptItem {
    pub name: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
}

/// Normalized extraction result shared by every engine. The
/// `total ≈ subtotal + tax` invariant is checked by the review policy,
/// never enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    pub store_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub items: Vec<ReceiptItem>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    /// 0-100 reliability estimate, engine-reported or a conservative
    /// per-engine default.
    pub confidence_score: u8,
    pub engine: EngineKind,
    pub needs_review: bool,
    pub review_reasons: Vec<String>,
}

//
// ================= Receipt Files =================
//

/// Temp upload handle. Created on upload, promoted to a
/// [`PermanentReceiptFile`] alongside the transaction write, or purged by
/// an external janitor when it expires unpromoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptFileHandle {
    pub temp_id: Uuid,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_ref: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentReceiptFile {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_path: String,
}

//
// ================= Categories =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Income,
    Expense,
    Both,
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CategoryType::Income => "income",
            CategoryType::Expense => "expense",
            CategoryType::Both => "both",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_category_type(self) -> CategoryType {
        match self {
            TransactionType::Income => CategoryType::Income,
            TransactionType::Expense => CategoryType::Expense,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        };
        write!(f, "{}", s)
    }
}

impl CategoryType {
    /// A category is usable for a transaction when the types match or the
    /// category accepts both.
    pub fn accepts(self, tx_type: TransactionType) -> bool {
        self == CategoryType::Both || self == tx_type.as_category_type()
    }
}

/// `owner_id == None` marks a shared/default category visible to everyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub kind: CategoryType,
    pub owner_id: Option<Uuid>,
    pub color: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub kind: CategoryType,
    pub owner_id: Option<Uuid>,
    pub color: String,
    pub icon: String,
}

//
// ================= Tabular Import =================
//

/// Ephemeral record reconstructed from one import line. The category hint
/// stays unresolved here; resolution and persistence happen downstream,
/// one record at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTransactionRecord {
    pub raw_line: String,
    pub date: NaiveDate,
    pub description: String,
    /// Positive magnitude; direction lives in `inferred_type`.
    pub amount: f64,
    pub inferred_type: TransactionType,
    pub category_hint: String,
    /// 1-based line number in the source text.
    pub source_line: usize,
}

/// Per-line parse failure. Collected, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParseError {
    pub line_number: usize,
    pub raw_line: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported_count: usize,
    pub error_count: usize,
    pub records: Vec<CandidateTransactionRecord>,
    pub errors: Vec<ImportParseError>,
}

//
// ================= Transactions =================
//

/// Receipt fields persisted on a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptAttachment {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub store_name: Option<String>,
    pub total: Option<f64>,
    pub tax: Option<f64>,
    pub subtotal: Option<f64>,
    pub items: Vec<ReceiptItem>,
    pub confidence_score: u8,
    pub engine: EngineKind,
    pub needs_review: bool,
    pub review_reasons: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// Caller-supplied edits. Always final authority over extracted values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionOverrides {
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub amount: f64,
    pub tx_type: TransactionType,
    pub date: NaiveDate,
    pub description: String,
    pub category_id: Uuid,
    pub owner_id: Uuid,
    pub receipt: Option<ReceiptAttachment>,
    pub is_imported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: f64,
    pub tx_type: TransactionType,
    pub date: NaiveDate,
    pub description: String,
    pub category_id: Uuid,
    pub owner_id: Uuid,
    pub receipt: Option<ReceiptAttachment>,
    pub is_imported: bool,
    pub created_at: DateTime<Utc>,
}
