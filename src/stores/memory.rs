//! In-memory store implementations for tests and the demo binary

use crate::error::IngestError;
use crate::models::{Category, NewCategory, Transaction, TransactionDraft, TransactionType};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BlobStore, CategoryStore, TempBlob, TransactionStore};

pub struct InMemoryCategoryStore {
    categories: Arc<RwLock<HashMap<Uuid, Category>>>,
}

impl InMemoryCategoryStore {
    pub fn new() -> Self {
        Self {
            categories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a shared/default category, useful for tests.
    pub async fn seed(&self, category: Category) {
        let mut categories = self.categories.write().await;
        categories.insert(category.id, category);
    }
}

impl Default for InMemoryCategoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_scope(category: &Category, owner_id: Uuid) -> bool {
    category.owner_id.is_none() || category.owner_id == Some(owner_id)
}

#[async_trait::async_trait]
impl CategoryStore for InMemoryCategoryStore {
    async fn find_by_id(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Category>> {
        let categories = self.categories.read().await;
        Ok(categories
            .get(&id)
            .filter(|c| in_scope(c, owner_id))
            .cloned())
    }

    async fn find_by_name(
        &self,
        name: &str,
        owner_id: Uuid,
        tx_type: TransactionType,
    ) -> Result<Option<Category>> {
        let categories = self.categories.read().await;
        Ok(categories
            .values()
            .find(|c| {
                in_scope(c, owner_id)
                    && c.kind.accepts(tx_type)
                    && c.name.eq_ignore_ascii_case(name)
            })
            .cloned())
    }

    async fn create(&self, category: NewCategory) -> Result<Category> {
        let created = Category {
            id: Uuid::new_v4(),
            name: category.name,
            kind: category.kind,
            owner_id: category.owner_id,
            color: category.color,
            icon: category.icon,
            created_at: Utc::now(),
        };
        let mut categories = self.categories.write().await;
        categories.insert(created.id, created.clone());
        Ok(created)
    }
}

pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self {
            transactions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.transactions.read().await.clone()
    }
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn materialize(draft: TransactionDraft) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        amount: draft.amount,
        tx_type: draft.tx_type,
        date: draft.date,
        description: draft.description,
        category_id: draft.category_id,
        owner_id: draft.owner_id,
        receipt: draft.receipt,
        is_imported: draft.is_imported,
        created_at: Utc::now(),
    }
}

#[async_trait::async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, draft: TransactionDraft) -> Result<Transaction> {
        let transaction = materialize(draft);
        let mut transactions = self.transactions.write().await;
        transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn bulk_insert(&self, drafts: Vec<TransactionDraft>) -> Result<Vec<Transaction>> {
        let created: Vec<Transaction> = drafts.into_iter().map(materialize).collect();
        let mut transactions = self.transactions.write().await;
        transactions.extend(created.iter().cloned());
        Ok(created)
    }

    async fn count(&self, owner_id: Uuid) -> Result<u64> {
        let transactions = self.transactions.read().await;
        Ok(transactions.iter().filter(|t| t.owner_id == owner_id).count() as u64)
    }
}

/// Blob store backed by a map from storage ref to bytes. Temp refs live
/// under `tmp/`, promoted refs under `receipts/`.
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn contains(&self, storage_ref: &str) -> bool {
        self.blobs.read().await.contains_key(storage_ref)
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn write_temp(&self, bytes: &[u8], _original_name: &str) -> Result<TempBlob> {
        let id = Uuid::new_v4();
        let storage_ref = format!("tmp/{}", id);
        let mut blobs = self.blobs.write().await;
        blobs.insert(storage_ref.clone(), bytes.to_vec());
        Ok(TempBlob { id, storage_ref })
    }

    async fn promote(&self, temp_ref: &str, permanent_name: &str) -> Result<String> {
        let mut blobs = self.blobs.write().await;
        let bytes = blobs
            .remove(temp_ref)
            .ok_or_else(|| IngestError::FileMove(format!("temp blob not found: {}", temp_ref)))?;
        let path = format!("receipts/{}", permanent_name);
        blobs.insert(path.clone(), bytes);
        Ok(path)
    }

    async fn delete(&self, storage_ref: &str) -> Result<()> {
        let mut blobs = self.blobs.write().await;
        blobs.remove(storage_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryType;

    #[tokio::test]
    async fn name_lookup_is_case_insensitive_and_scoped() {
        let store = InMemoryCategoryStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        store
            .create(NewCategory {
                name: "Groceries".into(),
                kind: CategoryType::Expense,
                owner_id: Some(owner),
                color: "#4a90d9".into(),
                icon: "folder".into(),
            })
            .await
            .unwrap();

        let hit = store
            .find_by_name("gRoCeRiEs", owner, TransactionType::Expense)
            .await
            .unwrap();
        assert!(hit.is_some());

        // Wrong owner: not shared, so invisible.
        let miss = store
            .find_by_name("groceries", other, TransactionType::Expense)
            .await
            .unwrap();
        assert!(miss.is_none());

        // Type-incompatible.
        let miss = store
            .find_by_name("groceries", owner, TransactionType::Income)
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn blob_promote_moves_the_temp_ref() {
        let store = InMemoryBlobStore::new();
        let temp = store.write_temp(b"receipt bytes", "a.jpg").await.unwrap();

        let path = store.promote(&temp.storage_ref, "rcpt_1.jpg").await.unwrap();
        assert_eq!(path, "receipts/rcpt_1.jpg");
        assert!(!store.contains(&temp.storage_ref).await);
        assert!(store.contains(&path).await);

        // The temp ref is gone, so a second move against it fails.
        assert!(store.promote(&temp.storage_ref, "rcpt_2.jpg").await.is_err());
    }
}
