//! Category resolution
//!
//! Maps a name/id hint to a concrete category without creating duplicates.
//! Non-id lookups never fail with "not found": the resolver walks down to
//! generic defaults and finally creates a category for the owner.

use crate::error::IngestError;
use crate::models::{Category, CategoryType, NewCategory, TransactionType};
use crate::stores::CategoryStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Generic domain defaults tried, in order, before creating anything.
const DEFAULT_CATEGORY_NAMES: &[&str] = &["General", "Miscellaneous", "Uncategorized"];

/// Fixed identity for resolver-created categories.
const CREATED_CATEGORY_NAME: &str = "General";
const CREATED_CATEGORY_COLOR: &str = "#9aa0a6";
const CREATED_CATEGORY_ICON: &str = "label";

/// Reject a category whose type is incompatible with the transaction.
///
/// Enforced independently at every transaction write, no matter which
/// resolution branch produced the category or whether it came from a
/// stored id.
pub fn ensure_type_compatible(category: &Category, tx_type: TransactionType) -> Result<()> {
    if category.kind.accepts(tx_type) {
        Ok(())
    } else {
        Err(IngestError::CategoryConflict {
            category_name: category.name.clone(),
            category_kind: category.kind.to_string(),
            requested: tx_type.to_string(),
        })
    }
}

pub struct CategoryResolver {
    store: Arc<dyn CategoryStore>,
}

impl CategoryResolver {
    pub fn new(store: Arc<dyn CategoryStore>) -> Self {
        Self { store }
    }

    /// Resolve a category, first match wins:
    /// 1. explicit id → exact lookup, absent is an error (callers that
    ///    passed an id expect validation);
    /// 2. name hint → case-insensitive, owner-or-shared, type-compatible;
    /// 3. ordered generic defaults, same rule;
    /// 4. create a fresh owner category with the requested type.
    pub async fn resolve(
        &self,
        name_hint: Option<&str>,
        id_hint: Option<Uuid>,
        tx_type: TransactionType,
        owner_id: Uuid,
    ) -> Result<Category> {
        if let Some(id) = id_hint {
            let category = self
                .store
                .find_by_id(id, owner_id)
                .await?
                .ok_or(IngestError::CategoryNotFound(id))?;
            debug!(category_id = %category.id, "Category resolved by id");
            return Ok(category);
        }

        if let Some(name) = name_hint.map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(category) = self.store.find_by_name(name, owner_id, tx_type).await? {
                debug!(category_id = %category.id, name, "Category resolved by name");
                return Ok(category);
            }
        }

        for default_name in DEFAULT_CATEGORY_NAMES {
            if let Some(category) = self
                .store
                .find_by_name(default_name, owner_id, tx_type)
                .await?
            {
                debug!(
                    category_id = %category.id,
                    name = default_name,
                    "Category resolved to a domain default"
                );
                return Ok(category);
            }
        }

        let created = self
            .store
            .create(NewCategory {
                name: CREATED_CATEGORY_NAME.to_string(),
                kind: tx_type.as_category_type(),
                owner_id: Some(owner_id),
                color: CREATED_CATEGORY_COLOR.to_string(),
                icon: CREATED_CATEGORY_ICON.to_string(),
            })
            .await?;

        info!(
            category_id = %created.id,
            owner_id = %owner_id,
            kind = %created.kind,
            "Category created for owner"
        );

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryCategoryStore;
    use chrono::Utc;

    fn resolver() -> (CategoryResolver, Arc<InMemoryCategoryStore>) {
        let store = Arc::new(InMemoryCategoryStore::new());
        (CategoryResolver::new(store.clone()), store)
    }

    fn shared_category(name: &str, kind: CategoryType) -> Category {
        Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            owner_id: None,
            color: "#4a90d9".into(),
            icon: "folder".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn id_hint_absent_is_not_found() {
        let (resolver, _) = resolver();
        let missing = Uuid::new_v4();

        let result = resolver
            .resolve(None, Some(missing), TransactionType::Expense, Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(IngestError::CategoryNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn name_hint_matches_case_insensitively() {
        let (resolver, store) = resolver();
        let seeded = shared_category("Groceries", CategoryType::Expense);
        store.seed(seeded.clone()).await;

        let resolved = resolver
            .resolve(
                Some("GROCERIES"),
                None,
                TransactionType::Expense,
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        assert_eq!(resolved.id, seeded.id);
    }

    #[tokio::test]
    async fn falls_through_to_domain_defaults() {
        let (resolver, store) = resolver();
        let general = shared_category("General", CategoryType::Both);
        store.seed(general.clone()).await;

        let resolved = resolver
            .resolve(
                Some("No Such Category"),
                None,
                TransactionType::Income,
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        assert_eq!(resolved.id, general.id);
    }

    #[tokio::test]
    async fn identical_resolves_create_exactly_one_category() {
        let (resolver, _) = resolver();
        let owner = Uuid::new_v4();

        let first = resolver
            .resolve(Some("Coffee"), None, TransactionType::Expense, owner)
            .await
            .unwrap();
        let second = resolver
            .resolve(Some("Coffee"), None, TransactionType::Expense, owner)
            .await
            .unwrap();

        // Second call retrieves the first's result rather than creating
        // a duplicate default.
        assert_eq!(first.id, second.id);
        assert_eq!(first.owner_id, Some(owner));
    }

    #[tokio::test]
    async fn type_mismatch_is_a_conflict_regardless_of_origin() {
        let salary = shared_category("Salary", CategoryType::Income);

        let result = ensure_type_compatible(&salary, TransactionType::Expense);
        assert!(matches!(result, Err(IngestError::CategoryConflict { .. })));

        let both = shared_category("General", CategoryType::Both);
        assert!(ensure_type_compatible(&both, TransactionType::Expense).is_ok());
        assert!(ensure_type_compatible(&both, TransactionType::Income).is_ok());
    }
}
