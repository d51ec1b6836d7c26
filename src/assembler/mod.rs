//! Transaction assembly and receipt-file lifecycle
//!
//! Merges a normalized receipt, a resolved category and caller overrides
//! into a persistable draft, and moves temp receipt blobs into permanent
//! storage. Promotion is best-effort: a failed move never blocks the
//! transaction write.

use crate::error::IngestError;
use crate::models::{
    Category, ExtractedReceipt, PermanentReceiptFile, ReceiptAttachment, ReceiptFileHandle,
    TransactionDraft, TransactionOverrides, TransactionType,
};
use crate::stores::BlobStore;
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub struct TransactionAssembler {
    blob_store: Arc<dyn BlobStore>,
    /// Temp ids already promoted. A second promotion of the same handle
    /// must fail distinctly rather than silently overwrite.
    promoted: Mutex<HashSet<Uuid>>,
}

impl TransactionAssembler {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            blob_store,
            promoted: Mutex::new(HashSet::new()),
        }
    }

    /// Pure merge of extraction output, category and overrides.
    /// Overrides always take final authority over extracted values.
    pub fn assemble(
        &self,
        receipt: &ExtractedReceipt,
        owner_id: Uuid,
        category: &Category,
        overrides: &TransactionOverrides,
    ) -> TransactionDraft {
        let amount = overrides
            .amount
            .or(receipt.total)
            .unwrap_or_else(|| receipt.items.iter().map(|i| i.price).sum());

        let description = overrides.description.clone().unwrap_or_else(|| {
            receipt
                .store_name
                .as_deref()
                .map(|store| format!("Receipt from {}", store))
                .unwrap_or_else(|| "Receipt".to_string())
        });

        let date = overrides
            .date
            .or(receipt.date)
            .unwrap_or_else(|| Utc::now().date_naive());

        TransactionDraft {
            amount,
            // Purchase receipts always describe money going out.
            tx_type: TransactionType::Expense,
            date,
            description,
            category_id: category.id,
            owner_id,
            receipt: None,
            is_imported: false,
        }
    }

    /// Build the receipt fields persisted on the transaction once the
    /// file has a permanent home.
    pub fn attachment(
        &self,
        receipt: &ExtractedReceipt,
        file: &PermanentReceiptFile,
    ) -> ReceiptAttachment {
        ReceiptAttachment {
            filename: file.filename.clone(),
            original_name: file.original_name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size_bytes,
            storage_path: file.storage_path.clone(),
            store_name: receipt.store_name.clone(),
            total: receipt.total,
            tax: receipt.tax,
            subtotal: receipt.subtotal,
            items: receipt.items.clone(),
            confidence_score: receipt.confidence_score,
            engine: receipt.engine,
            needs_review: receipt.needs_review,
            review_reasons: receipt.review_reasons.clone(),
            processed_at: Utc::now(),
        }
    }

    /// Move the temp blob into permanent storage under a freshly
    /// generated name. Collisions are ruled out by the timestamp plus a
    /// random component.
    pub async fn promote_receipt_file(
        &self,
        handle: &ReceiptFileHandle,
    ) -> Result<PermanentReceiptFile> {
        // Holding the ledger across the move keeps the check-then-promote
        // sequence atomic with respect to concurrent callers.
        let mut promoted = self.promoted.lock().await;
        if promoted.contains(&handle.temp_id) {
            return Err(IngestError::AlreadyPromoted(handle.temp_id.to_string()));
        }

        let extension = handle
            .original_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("bin");
        let random: String = Uuid::new_v4().simple().to_string()[..8].to_string();
        let filename = format!("rcpt_{}_{}.{}", Utc::now().timestamp(), random, extension);

        let storage_path = self
            .blob_store
            .promote(&handle.storage_ref, &filename)
            .await
            .map_err(|e| match e {
                IngestError::FileMove(m) => IngestError::FileMove(m),
                other => IngestError::FileMove(other.to_string()),
            })?;

        promoted.insert(handle.temp_id);

        info!(
            temp_id = %handle.temp_id,
            filename = %filename,
            "Receipt file promoted"
        );

        Ok(PermanentReceiptFile {
            filename,
            original_name: handle.original_name.clone(),
            mime_type: handle.mime_type.clone(),
            size_bytes: handle.size_bytes,
            storage_path,
        })
    }
}
