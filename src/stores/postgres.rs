//! Postgres-backed category and transaction stores
//!
//! Pool is created lazily from DATABASE_URL; schema is applied on first
//! use so the server can boot before the database accepts connections.

use crate::error::IngestError;
use crate::models::{
    Category, CategoryType, NewCategory, Transaction, TransactionDraft, TransactionType,
};
use crate::Result;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{CategoryStore, TransactionStore};

/// Build a lazily connecting pool from a database URL.
pub fn connect_lazy(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(database_url)
        .map_err(IngestError::from)
}

async fn ensure_schema(pool: &PgPool, ready: &OnceCell<()>) -> Result<()> {
    ready
        .get_or_try_init(|| async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                  id UUID PRIMARY KEY,
                  name TEXT NOT NULL,
                  kind TEXT NOT NULL,
                  owner_id UUID,
                  color TEXT NOT NULL,
                  icon TEXT NOT NULL,
                  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS transactions (
                  id UUID PRIMARY KEY,
                  amount DOUBLE PRECISION NOT NULL,
                  tx_type TEXT NOT NULL,
                  date DATE NOT NULL,
                  description TEXT NOT NULL,
                  category_id UUID NOT NULL,
                  owner_id UUID NOT NULL,
                  receipt JSONB,
                  is_imported BOOLEAN NOT NULL DEFAULT FALSE,
                  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
            )
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                CREATE INDEX IF NOT EXISTS idx_transactions_owner_date
                ON transactions (owner_id, date);
                "#,
            )
            .execute(pool)
            .await?;

            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| IngestError::Storage(format!("failed to initialize schema: {}", e)))?;

    Ok(())
}

fn category_kind_to_db(kind: CategoryType) -> &'static str {
    match kind {
        CategoryType::Income => "income",
        CategoryType::Expense => "expense",
        CategoryType::Both => "both",
    }
}

fn category_kind_from_db(kind: &str) -> CategoryType {
    match kind {
        "income" => CategoryType::Income,
        "expense" => CategoryType::Expense,
        _ => CategoryType::Both,
    }
}

fn tx_type_to_db(tx_type: TransactionType) -> &'static str {
    match tx_type {
        TransactionType::Income => "income",
        TransactionType::Expense => "expense",
    }
}

fn category_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<Category, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: category_kind_from_db(&kind),
        owner_id: row.try_get("owner_id")?,
        color: row.try_get("color")?,
        icon: row.try_get("icon")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PgCategoryStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgCategoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }
}

#[async_trait::async_trait]
impl CategoryStore for PgCategoryStore {
    async fn find_by_id(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Category>> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let row = sqlx::query(
            r#"
            SELECT id, name, kind, owner_id, color, icon, created_at
            FROM categories
            WHERE id = $1 AND (owner_id = $2 OR owner_id IS NULL)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| category_from_row(&r))
            .transpose()
            .map_err(IngestError::from)
    }

    async fn find_by_name(
        &self,
        name: &str,
        owner_id: Uuid,
        tx_type: TransactionType,
    ) -> Result<Option<Category>> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let row = sqlx::query(
            r#"
            SELECT id, name, kind, owner_id, color, icon, created_at
            FROM categories
            WHERE LOWER(name) = LOWER($1)
              AND (owner_id = $2 OR owner_id IS NULL)
              AND (kind = $3 OR kind = 'both')
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .bind(tx_type_to_db(tx_type))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| category_from_row(&r))
            .transpose()
            .map_err(IngestError::from)
    }

    async fn create(&self, category: NewCategory) -> Result<Category> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let created = Category {
            id: Uuid::new_v4(),
            name: category.name,
            kind: category.kind,
            owner_id: category.owner_id,
            color: category.color,
            icon: category.icon,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO categories (id, name, kind, owner_id, color, icon, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(created.id)
        .bind(&created.name)
        .bind(category_kind_to_db(created.kind))
        .bind(created.owner_id)
        .bind(&created.color)
        .bind(&created.icon)
        .bind(created.created_at)
        .execute(&self.pool)
        .await?;

        Ok(created)
    }
}

pub struct PgTransactionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
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

    async fn insert_one<'e, E>(executor: E, transaction: &Transaction) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let receipt_json = transaction
            .receipt
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO transactions
              (id, amount, tx_type, date, description, category_id, owner_id,
               receipt, is_imported, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.amount)
        .bind(tx_type_to_db(transaction.tx_type))
        .bind(transaction.date)
        .bind(&transaction.description)
        .bind(transaction.category_id)
        .bind(transaction.owner_id)
        .bind(receipt_json)
        .bind(transaction.is_imported)
        .bind(transaction.created_at)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, draft: TransactionDraft) -> Result<Transaction> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let transaction = Self::materialize(draft);
        Self::insert_one(&self.pool, &transaction).await?;
        Ok(transaction)
    }

    async fn bulk_insert(&self, drafts: Vec<TransactionDraft>) -> Result<Vec<Transaction>> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let transactions: Vec<Transaction> =
            drafts.into_iter().map(Self::materialize).collect();

        // One database transaction bounds the round-trips for the batch.
        let mut db_tx = self.pool.begin().await?;
        for transaction in &transactions {
            Self::insert_one(&mut *db_tx, transaction).await?;
        }
        db_tx.commit().await?;

        Ok(transactions)
    }

    async fn count(&self, owner_id: Uuid) -> Result<u64> {
        ensure_schema(&self.pool, &self.schema_ready).await?;

        let row = sqlx::query("SELECT COUNT(*) AS n FROM transactions WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
