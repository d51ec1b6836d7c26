//! Ingestion service - the surface exposed to the request layer
//!
//! FLOW A: bytes → extraction → (category, assembly, promotion, write)
//! FLOW B: text → tabular parse → per-record categories → one bulk write
//!
//! Downstream failures degrade, they never discard completed extraction
//! work.

use crate::assembler::TransactionAssembler;
use crate::categories::{ensure_type_compatible, CategoryResolver};
use crate::error::IngestError;
use crate::import::TabularImportParser;
use crate::models::{
    ExtractedReceipt, ImportParseError, ImportSummary, ReceiptFileHandle, Transaction,
    TransactionDraft, TransactionOverrides, TransactionType,
};
use crate::orchestrator::ExtractionOrchestrator;
use crate::stores::{BlobStore, TransactionStore};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Ceiling for one receipt pipeline, both engine attempts included.
const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Outcome of the auto-file pipeline. Anything short of a filed
/// transaction still carries whatever extraction produced.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoFileOutcome {
    /// Trusted extraction, transaction persisted.
    Filed {
        transaction: Transaction,
        receipt: ExtractedReceipt,
    },
    /// Extraction succeeded but the trust policy wants a human; nothing
    /// was persisted. The temp handle stays valid for a later
    /// [`ReceiptIngestService::create_from_extracted`].
    ReviewRequired {
        receipt: ExtractedReceipt,
        file: ReceiptFileHandle,
    },
    /// A downstream stage failed; the caller gets the extracted data (if
    /// any) plus the error, and can fall back to manual entry.
    Degraded {
        receipt: Option<ExtractedReceipt>,
        error: String,
    },
}

/// Inputs for creating a transaction from an already-extracted receipt.
#[derive(Debug, Clone)]
pub struct CreateFromExtracted {
    pub receipt: ExtractedReceipt,
    pub file: Option<ReceiptFileHandle>,
    pub overrides: TransactionOverrides,
    pub category_id: Option<Uuid>,
    pub category_hint: Option<String>,
}

pub struct ReceiptIngestService {
    orchestrator: ExtractionOrchestrator,
    resolver: CategoryResolver,
    assembler: TransactionAssembler,
    transactions: Arc<dyn TransactionStore>,
    blob_store: Arc<dyn BlobStore>,
    extraction_timeout: Duration,
}

impl ReceiptIngestService {
    pub fn new(
        orchestrator: ExtractionOrchestrator,
        resolver: CategoryResolver,
        assembler: TransactionAssembler,
        transactions: Arc<dyn TransactionStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
            assembler,
            transactions,
            blob_store,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    /// Extraction with no persistence side effects. Returns either a
    /// populated receipt or a structured failure, never a panic.
    pub async fn extract_only(
        &self,
        bytes: &[u8],
        mime_type: &str,
        engine_hint: Option<&str>,
    ) -> Result<ExtractedReceipt> {
        self.orchestrator
            .extract_with_timeout(bytes, mime_type, engine_hint, self.extraction_timeout)
            .await
    }

    /// Full FLOW A. Failures after a successful extraction degrade to a
    /// payload that still carries the receipt.
    pub async fn upload_and_auto_file(
        &self,
        bytes: &[u8],
        mime_type: &str,
        original_name: &str,
        engine_hint: Option<&str>,
        category_hint: Option<&str>,
        owner_id: Uuid,
    ) -> Result<AutoFileOutcome> {
        // Temp handle first: review and manual-entry paths need it even
        // when filing never happens.
        let temp = self.blob_store.write_temp(bytes, original_name).await?;
        let handle = ReceiptFileHandle {
            temp_id: temp.id,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: bytes.len() as u64,
            storage_ref: temp.storage_ref,
            uploaded_at: Utc::now(),
        };

        let receipt = match self.extract_only(bytes, mime_type, engine_hint).await {
            Ok(receipt) => receipt,
            Err(e) => {
                info!(owner_id = %owner_id, error = %e, "Extraction failed, offering manual entry");
                return Ok(AutoFileOutcome::Degraded {
                    receipt: None,
                    error: e.to_string(),
                });
            }
        };

        if receipt.needs_review {
            info!(
                owner_id = %owner_id,
                reasons = receipt.review_reasons.len(),
                "Receipt held for review"
            );
            return Ok(AutoFileOutcome::ReviewRequired {
                receipt,
                file: handle,
            });
        }

        let request = CreateFromExtracted {
            receipt: receipt.clone(),
            file: Some(handle),
            overrides: TransactionOverrides::default(),
            category_id: None,
            category_hint: category_hint.map(str::to_string),
        };

        match self.create_from_extracted(request, owner_id).await {
            Ok(transaction) => Ok(AutoFileOutcome::Filed {
                transaction,
                receipt,
            }),
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "Auto-file degraded after extraction");
                Ok(AutoFileOutcome::Degraded {
                    receipt: Some(receipt),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Create a transaction from extracted (and possibly human-reviewed)
    /// receipt data. Overrides always beat extracted values; receipt-file
    /// promotion is best-effort and never blocks the write.
    pub async fn create_from_extracted(
        &self,
        request: CreateFromExtracted,
        owner_id: Uuid,
    ) -> Result<Transaction> {
        let mut draft = self
            .resolve_and_assemble(&request, owner_id)
            .await?;

        if let Some(handle) = &request.file {
            match self.assembler.promote_receipt_file(handle).await {
                Ok(permanent) => {
                    draft.receipt = Some(self.assembler.attachment(&request.receipt, &permanent));
                }
                Err(e @ IngestError::AlreadyPromoted(_)) => return Err(e),
                Err(e) => {
                    // Degrade to a receipt-less transaction.
                    warn!(
                        temp_id = %handle.temp_id,
                        error = %e,
                        "Receipt promotion failed, writing transaction without file"
                    );
                }
            }
        }

        let transaction = self.transactions.create(draft).await?;
        info!(
            transaction_id = %transaction.id,
            owner_id = %owner_id,
            has_receipt = transaction.receipt.is_some(),
            "Transaction persisted"
        );
        Ok(transaction)
    }

    async fn resolve_and_assemble(
        &self,
        request: &CreateFromExtracted,
        owner_id: Uuid,
    ) -> Result<TransactionDraft> {
        // Purchase receipts always file as expenses.
        let tx_type = TransactionType::Expense;

        let category = self
            .resolver
            .resolve(
                request.category_hint.as_deref(),
                request.category_id,
                tx_type,
                owner_id,
            )
            .await?;

        // Enforced at every write, whatever branch produced the category.
        ensure_type_compatible(&category, tx_type)?;

        Ok(self
            .assembler
            .assemble(&request.receipt, owner_id, &category, &request.overrides))
    }

    /// Full FLOW B: parse, resolve categories per record, one bulk write.
    pub async fn import_tabular(&self, text: &str, owner_id: Uuid) -> Result<ImportSummary> {
        let (records, mut errors) = TabularImportParser::parse(text);

        if records.is_empty() {
            return Err(IngestError::NoValidRecords);
        }

        let mut drafts = Vec::with_capacity(records.len());
        let mut imported_records = Vec::with_capacity(records.len());

        // Per-record resolution: one bad record never aborts the batch.
        for record in records {
            let category = match self
                .resolver
                .resolve(
                    Some(&record.category_hint),
                    None,
                    record.inferred_type,
                    owner_id,
                )
                .await
                .and_then(|category| {
                    ensure_type_compatible(&category, record.inferred_type)?;
                    Ok(category)
                }) {
                Ok(category) => category,
                Err(e) => {
                    errors.push(ImportParseError {
                        line_number: record.source_line,
                        raw_line: record.raw_line.clone(),
                        reason: format!("category resolution failed: {}", e),
                    });
                    continue;
                }
            };

            drafts.push(TransactionDraft {
                amount: record.amount,
                tx_type: record.inferred_type,
                date: record.date,
                description: record.description.clone(),
                category_id: category.id,
                owner_id,
                receipt: None,
                is_imported: true,
            });
            imported_records.push(record);
        }

        if drafts.is_empty() {
            return Err(IngestError::NoValidRecords);
        }

        let inserted = self.transactions.bulk_insert(drafts).await?;

        info!(
            owner_id = %owner_id,
            imported = inserted.len(),
            errors = errors.len(),
            "Tabular import finished"
        );

        Ok(ImportSummary {
            imported_count: inserted.len(),
            error_count: errors.len(),
            records: imported_records,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::ScriptedEngine;
    use crate::models::{
        Category, CategoryType, EngineKind, RawEngineItem, RawEngineResult, TransactionType,
    };
    use crate::stores::{
        CategoryStore, InMemoryBlobStore, InMemoryCategoryStore, InMemoryTransactionStore,
    };
    fn trusted_raw() -> RawEngineResult {
        RawEngineResult {
            store_name: Some("Corner Market".into()),
            date: Some("2024-03-02".into()),
            items: vec![RawEngineItem {
                name: "Milk".into(),
                price: Some("$3.49".into()),
                quantity: Some(1.0),
            }],
            subtotal: Some("$3.49".into()),
            tax: Some("$0.28".into()),
            total: Some("$3.77".into()),
            confidence: Some(95),
        }
    }

    fn low_confidence_raw() -> RawEngineResult {
        let mut raw = trusted_raw();
        raw.confidence = Some(50);
        raw
    }

    struct Harness {
        service: ReceiptIngestService,
        transactions: Arc<InMemoryTransactionStore>,
        categories: Arc<InMemoryCategoryStore>,
    }

    fn harness(cloud: ScriptedEngine) -> Harness {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let categories = Arc::new(InMemoryCategoryStore::new());
        let transactions = Arc::new(InMemoryTransactionStore::new());

        let orchestrator = ExtractionOrchestrator::new(
            Arc::new(ScriptedEngine::always(EngineKind::Offline, trusted_raw())),
            Arc::new(cloud),
        );

        let service = ReceiptIngestService::new(
            orchestrator,
            CategoryResolver::new(categories.clone()),
            TransactionAssembler::new(blob_store.clone()),
            transactions.clone(),
            blob_store,
        );

        Harness {
            service,
            transactions,
            categories,
        }
    }

    #[tokio::test]
    async fn auto_file_persists_a_transaction_with_receipt_fields() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));
        let owner = Uuid::new_v4();

        let outcome = h
            .service
            .upload_and_auto_file(b"jpeg", "image/jpeg", "scan.jpg", None, Some("Groceries"), owner)
            .await
            .unwrap();

        let AutoFileOutcome::Filed {
            transaction,
            receipt,
        } = outcome
        else {
            panic!("expected a filed transaction");
        };

        assert_eq!(transaction.amount, 3.77);
        assert_eq!(transaction.tx_type, TransactionType::Expense);
        assert!(!receipt.needs_review);

        let attachment = transaction.receipt.expect("receipt fields persisted");
        assert_eq!(attachment.original_name, "scan.jpg");
        assert!(attachment.filename.starts_with("rcpt_"));
        assert_eq!(attachment.engine, EngineKind::Cloud);
        assert_eq!(attachment.total, Some(3.77));

        assert_eq!(h.transactions.count(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn low_confidence_holds_for_review_without_persisting() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, low_confidence_raw()));
        let owner = Uuid::new_v4();

        let outcome = h
            .service
            .upload_and_auto_file(b"jpeg", "image/jpeg", "scan.jpg", None, None, owner)
            .await
            .unwrap();

        let AutoFileOutcome::ReviewRequired { receipt, file } = outcome else {
            panic!("expected review");
        };
        assert!(receipt.needs_review);
        assert_eq!(file.original_name, "scan.jpg");
        assert_eq!(h.transactions.count(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_degrades_to_manual_entry() {
        // Both engines down: the degraded payload must carry both errors.
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let categories = Arc::new(InMemoryCategoryStore::new());
        let transactions: Arc<InMemoryTransactionStore> = Arc::new(InMemoryTransactionStore::new());
        let service = ReceiptIngestService::new(
            ExtractionOrchestrator::new(
                Arc::new(ScriptedEngine::new(
                    EngineKind::Offline,
                    vec![Err(crate::error::EngineError::transient("sidecar down"))],
                )),
                Arc::new(ScriptedEngine::new(
                    EngineKind::Cloud,
                    vec![Err(crate::error::EngineError::transient("cloud down"))],
                )),
            ),
            CategoryResolver::new(categories),
            TransactionAssembler::new(blob_store.clone()),
            transactions,
            blob_store,
        );

        let outcome = service
            .upload_and_auto_file(b"jpeg", "image/jpeg", "scan.jpg", None, None, Uuid::new_v4())
            .await
            .unwrap();

        let AutoFileOutcome::Degraded { receipt, error } = outcome else {
            panic!("expected degradation");
        };
        assert!(receipt.is_none());
        assert!(error.contains("cloud down"));
        assert!(error.contains("sidecar down"));
    }

    #[tokio::test]
    async fn persistence_failure_degrades_but_keeps_the_receipt() {
        // A store that rejects every write: the extraction work must
        // survive in the degraded payload.
        struct RejectingTransactionStore;

        #[async_trait::async_trait]
        impl crate::stores::TransactionStore for RejectingTransactionStore {
            async fn create(&self, _: crate::models::TransactionDraft) -> crate::Result<Transaction> {
                Err(IngestError::Storage("write rejected".into()))
            }
            async fn bulk_insert(
                &self,
                _: Vec<crate::models::TransactionDraft>,
            ) -> crate::Result<Vec<Transaction>> {
                Err(IngestError::Storage("write rejected".into()))
            }
            async fn count(&self, _: Uuid) -> crate::Result<u64> {
                Ok(0)
            }
        }

        let blob_store = Arc::new(InMemoryBlobStore::new());
        let service = ReceiptIngestService::new(
            ExtractionOrchestrator::new(
                Arc::new(ScriptedEngine::always(EngineKind::Offline, trusted_raw())),
                Arc::new(ScriptedEngine::always(EngineKind::Cloud, trusted_raw())),
            ),
            CategoryResolver::new(Arc::new(InMemoryCategoryStore::new())),
            TransactionAssembler::new(blob_store.clone()),
            Arc::new(RejectingTransactionStore),
            blob_store,
        );

        let outcome = service
            .upload_and_auto_file(b"jpeg", "image/jpeg", "scan.jpg", None, None, Uuid::new_v4())
            .await
            .unwrap();

        let AutoFileOutcome::Degraded { receipt, error } = outcome else {
            panic!("expected degradation");
        };
        let receipt = receipt.expect("extracted receipt survives the failed write");
        assert_eq!(receipt.total, Some(3.77));
        assert!(error.contains("write rejected"));
    }

    #[tokio::test]
    async fn override_amount_beats_extracted_total() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));
        let owner = Uuid::new_v4();

        let receipt = h
            .service
            .extract_only(b"jpeg", "image/jpeg", None)
            .await
            .unwrap();

        let transaction = h
            .service
            .create_from_extracted(
                CreateFromExtracted {
                    receipt,
                    file: None,
                    overrides: TransactionOverrides {
                        amount: Some(99.0),
                        description: None,
                        date: None,
                    },
                    category_id: None,
                    category_hint: None,
                },
                owner,
            )
            .await
            .unwrap();

        assert_eq!(transaction.amount, 99.0);
        assert!(transaction.receipt.is_none());
    }

    #[tokio::test]
    async fn stored_category_id_with_wrong_type_is_a_conflict_at_write() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));
        let owner = Uuid::new_v4();

        let income_only = h
            .categories
            .create(crate::models::NewCategory {
                name: "Salary".into(),
                kind: CategoryType::Income,
                owner_id: Some(owner),
                color: "#2e7d32".into(),
                icon: "wallet".into(),
            })
            .await
            .unwrap();

        let receipt = h
            .service
            .extract_only(b"jpeg", "image/jpeg", None)
            .await
            .unwrap();

        let result = h
            .service
            .create_from_extracted(
                CreateFromExtracted {
                    receipt,
                    file: None,
                    overrides: TransactionOverrides::default(),
                    category_id: Some(income_only.id),
                    category_hint: None,
                },
                owner,
            )
            .await;

        assert!(matches!(result, Err(IngestError::CategoryConflict { .. })));
        assert_eq!(h.transactions.count(owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn import_tabular_resolves_and_bulk_inserts() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));
        let owner = Uuid::new_v4();

        let text = "Date,Description,Amount,Category\n\
                    2024-01-05,Grocery Store,-45.20,Groceries\n\
                    2024-01-06,Paycheck,2000,Salary\n\
                    bad-date,X,10";

        let summary = h.service.import_tabular(text, owner).await.unwrap();

        assert_eq!(summary.imported_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(h.transactions.count(owner).await.unwrap(), 2);

        let all = h.transactions.all().await;
        assert!(all.iter().all(|t| t.is_imported));
        let expense = all.iter().find(|t| t.tx_type == TransactionType::Expense).unwrap();
        assert_eq!(expense.amount, 45.20);
    }

    #[tokio::test]
    async fn import_with_no_valid_records_fails_whole_batch() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));

        let result = h
            .service
            .import_tabular("Date,Description,Amount\nbad,X,zero", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(IngestError::NoValidRecords)));
    }

    #[tokio::test]
    async fn import_shares_a_both_category_across_directions() {
        let h = harness(ScriptedEngine::always(EngineKind::Cloud, trusted_raw()));
        let owner = Uuid::new_v4();

        // A shared category of kind "both" accepts records in either
        // direction, so both lines land in the same category.
        h.categories
            .seed(Category {
                id: Uuid::new_v4(),
                name: "Imported".into(),
                kind: CategoryType::Both,
                owner_id: None,
                color: "#9aa0a6".into(),
                icon: "label".into(),
                created_at: Utc::now(),
            })
            .await;

        let text = "Date,Description,Amount\n\
                    2024-01-05,Refund,45.20\n\
                    2024-01-06,Utility payment,60.00";

        let summary = h.service.import_tabular(text, owner).await.unwrap();
        assert_eq!(summary.imported_count, 2);

        let all = h.transactions.all().await;
        assert_eq!(all.len(), 2);
        // Both resolve to the shared "Imported" (kind both) category.
        assert_eq!(all[0].category_id, all[1].category_id);
    }
}
