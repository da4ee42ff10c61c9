// src/search/mod.rs - Search backend abstraction over the KOL index
pub mod elastic;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::matching::query::BoolQuery;
use crate::models::core::CanonicalPerson;

pub use elastic::ElasticIndex;
pub use memory::InMemoryIndex;

/// Decoded result of one query: the backend's total-hit count and the top-N documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: u64,
    pub hits: Vec<CanonicalPerson>,
}

impl SearchHits {
    pub fn ids(&self) -> Vec<i64> {
        self.hits.iter().map(|p| p.id).collect()
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Runs `query`, returning at most `size` documents plus the total count.
    async fn search(&self, query: &BoolQuery, size: usize) -> Result<SearchHits>;

    /// Inserts or replaces the given documents, keyed by `id`.
    async fn index_people(&self, people: &[CanonicalPerson]) -> Result<usize>;

    /// Live documents in one deployment.
    async fn count(&self, deployment_id: i32) -> Result<u64>;

    /// Soft-deletes one document.
    async fn mark_deleted(&self, id: i64) -> Result<()>;
}
