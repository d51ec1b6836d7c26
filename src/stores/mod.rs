//! Persistence and blob-storage collaborators
//!
//! The core only consumes these contracts; indexing, querying and the
//! storage engine itself belong to the implementations. In-memory variants
//! back the tests and the demo binary, the postgres variants back the
//! server.

use crate::models::{Category, NewCategory, Transaction, TransactionDraft, TransactionType};
use crate::Result;
use uuid::Uuid;

pub mod fs_blob;
pub mod memory;
pub mod postgres;

pub use fs_blob::FsBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryCategoryStore, InMemoryTransactionStore};
pub use postgres::{PgCategoryStore, PgTransactionStore};

/// Category lookup and creation, scoped by an owner-or-shared predicate.
#[async_trait::async_trait]
pub trait CategoryStore: Send + Sync {
    /// Exact id lookup, visible when owned by `owner_id` or shared.
    async fn find_by_id(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Category>>;

    /// Case-insensitive exact-name lookup, owner-or-shared scope,
    /// restricted to categories compatible with `tx_type`.
    async fn find_by_name(
        &self,
        name: &str,
        owner_id: Uuid,
        tx_type: TransactionType,
    ) -> Result<Option<Category>>;

    async fn create(&self, category: NewCategory) -> Result<Category>;
}

/// Transaction persistence.
#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, draft: TransactionDraft) -> Result<Transaction>;

    /// Single bulk write; insertion order carries no semantic guarantee.
    async fn bulk_insert(&self, drafts: Vec<TransactionDraft>) -> Result<Vec<Transaction>>;

    async fn count(&self, owner_id: Uuid) -> Result<u64>;
}

/// Reference to a freshly written temp blob.
#[derive(Debug, Clone)]
pub struct TempBlob {
    pub id: Uuid,
    pub storage_ref: String,
}

/// Blob storage contract. Only write-temp / move / delete matter here;
/// everything else about the store is out of scope.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn write_temp(&self, bytes: &[u8], original_name: &str) -> Result<TempBlob>;

    /// Move a temp blob into permanent storage under `permanent_name`,
    /// returning the permanent storage path.
    async fn promote(&self, temp_ref: &str, permanent_name: &str) -> Result<String>;

    async fn delete(&self, storage_ref: &str) -> Result<()>;
}
