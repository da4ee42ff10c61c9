// src/search/elastic.rs - Elasticsearch adapter for the KOL index
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::{SearchBackend, SearchHits};
use crate::matching::query::{base_query, BoolQuery};
use crate::models::core::{CanonicalPerson, ExclusionSet};

#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    index: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: TotalHits,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: CanonicalPerson,
}

/// ES 6 reports a bare number, ES 7+ reports `{ "value": n, "relation": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(n) => *n,
            TotalHits::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl ElasticIndex {
    pub fn new(base_url: &str, index: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid Elasticsearch URL: {}", base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client for Elasticsearch")?;

        Ok(Self {
            client,
            base_url,
            index: index.to_string(),
        })
    }

    /// Connects and creates the index with its mapping when it does not exist yet.
    pub async fn connect(base_url: &str, index: &str) -> Result<Self> {
        let es = Self::new(base_url, index)?;
        es.ensure_index().await?;
        info!("Connection to Elasticsearch at {} established (index: {})", es.base_url, es.index);
        Ok(es)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let relative = if path.is_empty() {
            self.index.clone()
        } else {
            format!("{}/{}", self.index, path)
        };
        self.base_url
            .join(&relative)
            .with_context(|| format!("Failed to build Elasticsearch endpoint for {}", relative))
    }

    pub async fn ensure_index(&self) -> Result<bool> {
        let url = self.endpoint("")?;
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .context("Failed to check whether the index exists")?;

        if response.status().is_success() {
            return Ok(false);
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(anyhow!("Elasticsearch returned status {} for HEAD {}", response.status(), url));
        }

        info!("No mapping found for index {}. Creating one", self.index);
        let response = self
            .client
            .put(url)
            .json(&index_mapping())
            .send()
            .await
            .context("Failed to create the index")?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Index mapping couldn't be acknowledged: {}", body));
        }
        Ok(true)
    }
}

#[async_trait]
impl SearchBackend for ElasticIndex {
    async fn search(&self, query: &BoolQuery, size: usize) -> Result<SearchHits> {
        let body = search_body(query, size);
        debug!("Elasticsearch query: {}", body);

        let response = self
            .client
            .post(self.endpoint("_search")?)
            .json(&body)
            .send()
            .await
            .context("Search request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Elasticsearch returned status {}: {}", status, text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to decode search response")?;
        Ok(SearchHits {
            total: parsed.hits.total.value(),
            hits: parsed.hits.hits.into_iter().map(|h| h.source).collect(),
        })
    }

    async fn index_people(&self, people: &[CanonicalPerson]) -> Result<usize> {
        if people.is_empty() {
            return Ok(0);
        }

        let body = bulk_body(&self.index, people)?;
        let response = self
            .client
            .post(self.endpoint("_bulk")?)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Bulk index request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("Elasticsearch returned status {} for _bulk", response.status()));
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .context("Failed to decode bulk response")?;
        if parsed.errors {
            let failed = parsed
                .items
                .iter()
                .filter(|item| item.pointer("/index/error").is_some())
                .count();
            warn!("Bulk indexing: {} of {} documents rejected", failed, people.len());
            return Ok(people.len() - failed);
        }
        Ok(people.len())
    }

    async fn count(&self, deployment_id: i32) -> Result<u64> {
        let query = base_query(deployment_id, None, &ExclusionSet::new())?;
        let response = self
            .client
            .post(self.endpoint("_count")?)
            .json(&json!({ "query": query.to_json() }))
            .send()
            .await
            .context("Count request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("Elasticsearch returned status {} for _count", response.status()));
        }
        let parsed: CountResponse = response
            .json()
            .await
            .context("Failed to decode count response")?;
        Ok(parsed.count)
    }

    async fn mark_deleted(&self, id: i64) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&format!("_update/{}", id))?)
            .json(&json!({ "doc": { "deleted": 1 } }))
            .send()
            .await
            .with_context(|| format!("Failed to mark document {} as deleted", id))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Elasticsearch returned status {} when deleting document {}",
                response.status(),
                id
            ));
        }
        Ok(())
    }
}

fn search_body(query: &BoolQuery, size: usize) -> Value {
    json!({
        "query": query.to_json(),
        "from": 0,
        "size": size,
        "track_total_hits": true,
        "sort": ["_score", { "id": "asc" }]
    })
}

fn bulk_body(index: &str, people: &[CanonicalPerson]) -> Result<String> {
    let mut body = String::new();
    for person in people {
        let action = json!({ "index": { "_index": index, "_id": person.id.to_string() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(
            &serde_json::to_string(person)
                .with_context(|| format!("Failed to encode document {}", person.id))?,
        );
        body.push('\n');
    }
    Ok(body)
}

/// Keyword fields with normalizers; `.german` sub-fields carry German
/// normalization plus ASCII folding for the umlaut variants.
pub fn index_mapping() -> Value {
    let german = json!({ "german": { "type": "keyword", "normalizer": "german_folding" } });
    json!({
        "settings": {
            "analysis": {
                "normalizer": {
                    "ascii": { "type": "custom", "filter": ["asciifolding"] },
                    "folding": { "type": "custom", "filter": ["lowercase", "asciifolding"] },
                    "german_folding": {
                        "type": "custom",
                        "filter": ["lowercase", "german_normalization", "asciifolding"]
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "did": { "type": "integer" },
                "deleted": { "type": "byte" },
                "position": { "type": "long" },
                "name": { "type": "text" },
                "nameKeyword": { "type": "keyword", "normalizer": "ascii", "fields": german },
                "nameKeywordSquash": { "type": "keyword", "normalizer": "ascii", "fields": german },
                "nameKeywordRaw": { "type": "keyword", "normalizer": "folding" },
                "fn": { "type": "keyword", "normalizer": "folding" },
                "mn": { "type": "keyword", "normalizer": "folding" },
                "ln": { "type": "keyword", "normalizer": "folding", "fields": german },
                "fnDash": { "type": "boolean" },
                "fnDot": { "type": "boolean" },
                "aliases": { "type": "keyword", "normalizer": "folding" },
                "country": { "type": "keyword", "normalizer": "folding" },
                "city": { "type": "keyword", "normalizer": "folding" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::canonical::canonicalize;

    #[test]
    fn test_endpoints() {
        let es = ElasticIndex::new("http://localhost:9202", "experts").unwrap();
        assert_eq!(
            es.endpoint("_search").unwrap().as_str(),
            "http://localhost:9202/experts/_search"
        );

        let proxied = ElasticIndex::new("http://search.internal/es", "experts").unwrap();
        assert_eq!(
            proxied.endpoint("_update/42").unwrap().as_str(),
            "http://search.internal/es/experts/_update/42"
        );

        assert!(ElasticIndex::new("not a url", "experts").is_err());
    }

    #[test]
    fn test_total_hits_both_shapes() {
        let es6: SearchResponse =
            serde_json::from_value(json!({ "hits": { "total": 3, "hits": [] } })).unwrap();
        let es7: SearchResponse = serde_json::from_value(json!({
            "hits": { "total": { "value": 12, "relation": "eq" }, "hits": [] }
        }))
        .unwrap();
        assert_eq!(es6.hits.total.value(), 3);
        assert_eq!(es7.hits.total.value(), 12);
    }

    #[test]
    fn test_hits_decode_into_people() {
        let response: SearchResponse = serde_json::from_value(json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [{
                    "_id": "1262013",
                    "_source": {
                        "id": 1262013, "did": 1, "deleted": 0,
                        "fn": "Kai", "mn": "", "ln": "Huebel",
                        "nameKeyword": "Kai Huebel"
                    }
                }]
            }
        }))
        .unwrap();
        let person = &response.hits.hits[0].source;
        assert_eq!(person.id, 1262013);
        assert_eq!(person.last_name, "Huebel");
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let person = CanonicalPerson::from_canonical(
            7,
            3,
            canonicalize("Anna", "", "Vogt", &[]),
            "Germany",
            "Berlin",
            1,
        );
        let body = bulk_body("experts", &[person]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "7");
        let doc: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["nameKeywordSquash"], "AnnaVogt");
        assert_eq!(doc["deleted"], 0);
    }

    #[test]
    fn test_search_body_and_mapping() {
        let body = search_body(&BoolQuery::new(), 10);
        assert_eq!(body["size"], 10);
        assert_eq!(body["track_total_hits"], true);

        let mapping = index_mapping();
        assert_eq!(
            mapping["mappings"]["properties"]["ln"]["fields"]["german"]["normalizer"],
            "german_folding"
        );
    }
}
