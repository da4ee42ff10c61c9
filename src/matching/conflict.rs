// src/matching/conflict.rs - Conflict verification against the OneKey reference data
//
// Before a risky strategy links a KOL, the imported OneKey records are asked how
// many *other* people carry the same reduced name. If the CRM itself cannot tell
// them apart, the link is not made.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::utils::db_connect::PgPool;

#[async_trait]
pub trait ReferenceCounter: Send + Sync {
    /// Records whose first name matches `reduced_first` (prefix when it is a single
    /// character, exact otherwise) and whose last name equals `last_name`, not
    /// counting the record `exclude_customer_id` itself.
    async fn count_similar(
        &self,
        reduced_first: &str,
        last_name: &str,
        exclude_customer_id: &str,
    ) -> Result<i64>;
}

fn is_initial(reduced_first: &str) -> bool {
    reduced_first.chars().count() == 1
}

/// Reference counter over the imported OneKey table.
#[derive(Clone)]
pub struct PgReferenceCounter {
    pool: PgPool,
}

impl PgReferenceCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Escapes LIKE wildcards so an initial such as "_" is matched literally.
fn like_prefix(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}%", escaped)
}

#[async_trait]
impl ReferenceCounter for PgReferenceCounter {
    async fn count_similar(
        &self,
        reduced_first: &str,
        last_name: &str,
        exclude_customer_id: &str,
    ) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for count_similar")?;

        let result = if is_initial(reduced_first) {
            const PREFIX_SQL: &str = "
                SELECT COUNT(*) FROM public.onekey_record
                WHERE first_name LIKE $1 AND last_name = $2 AND src_cust_id <> $3";
            let pattern = like_prefix(reduced_first);
            conn.query_one(PREFIX_SQL, &[&pattern, &last_name, &exclude_customer_id])
                .await
        } else {
            const EXACT_SQL: &str = "
                SELECT COUNT(*) FROM public.onekey_record
                WHERE first_name = $1 AND last_name = $2 AND src_cust_id <> $3";
            conn.query_one(EXACT_SQL, &[&reduced_first, &last_name, &exclude_customer_id])
                .await
        };
        let row = result.with_context(|| {
            format!("Failed to count OneKey records like '{} {}'", reduced_first, last_name)
        })?;

        Ok(row.get(0))
    }
}

/// (customer id, first name, last name) rows held in memory.
#[derive(Debug, Default)]
pub struct InMemoryReferenceStore {
    records: RwLock<HashMap<String, (String, String)>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, customer_id: &str, first_name: &str, last_name: &str) {
        self.records.write().await.insert(
            customer_id.to_string(),
            (first_name.to_string(), last_name.to_string()),
        );
    }
}

#[async_trait]
impl ReferenceCounter for InMemoryReferenceStore {
    async fn count_similar(
        &self,
        reduced_first: &str,
        last_name: &str,
        exclude_customer_id: &str,
    ) -> Result<i64> {
        let records = self.records.read().await;
        let prefix = is_initial(reduced_first);
        let count = records
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_customer_id)
            .filter(|(_, (first, last))| {
                last == last_name
                    && if prefix {
                        first.starts_with(reduced_first)
                    } else {
                        first == reduced_first
                    }
            })
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> InMemoryReferenceStore {
        let store = InMemoryReferenceStore::new();
        store.insert("WDEM01", "Jan", "Thomas").await;
        store.insert("WDEM02", "Jens", "Thomas").await;
        store.insert("WDEM03", "Jan", "Thomson").await;
        store.insert("WDEM04", "Ralf", "Dittrich").await;
        store
    }

    #[tokio::test]
    async fn test_single_character_first_name_is_a_prefix_match() {
        let store = store().await;
        assert_eq!(store.count_similar("J", "Thomas", "nobody").await.unwrap(), 2);
        assert_eq!(store.count_similar("J", "Thomas", "WDEM01").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_first_name_is_exact() {
        let store = store().await;
        assert_eq!(store.count_similar("Jan", "Thomas", "nobody").await.unwrap(), 1);
        assert_eq!(store.count_similar("Ja", "Thomas", "nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_own_record_never_counts() {
        let store = store().await;
        assert_eq!(store.count_similar("Ralf", "Dittrich", "WDEM04").await.unwrap(), 0);
    }

    #[test]
    fn test_like_prefix_escaping() {
        assert_eq!(like_prefix("J"), "J%");
        assert_eq!(like_prefix("_"), "\\_%");
        assert_eq!(like_prefix("%"), "\\%%");
    }
}
