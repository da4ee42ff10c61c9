// src/search/memory.rs - In-process search backend
//
// Evaluates the same query tree the Elasticsearch adapter renders, with the
// field normalizers declared in the index mapping applied on both sides.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::{SearchBackend, SearchHits};
use crate::matching::query::{BoolQuery, Clause, Field};
use crate::models::core::CanonicalPerson;

#[derive(Debug, Default)]
pub struct InMemoryIndex {
    docs: RwLock<BTreeMap<i64, CanonicalPerson>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_people(people: Vec<CanonicalPerson>) -> Self {
        let index = Self::new();
        {
            let mut docs = index.docs.write().await;
            for person in people {
                docs.insert(person.id, person);
            }
        }
        index
    }

    pub async fn get(&self, id: i64) -> Option<CanonicalPerson> {
        self.docs.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl SearchBackend for InMemoryIndex {
    async fn search(&self, query: &BoolQuery, size: usize) -> Result<SearchHits> {
        let docs = self.docs.read().await;
        let matched: Vec<&CanonicalPerson> = docs
            .values()
            .filter(|person| bool_matches(query, person))
            .collect();

        Ok(SearchHits {
            total: matched.len() as u64,
            hits: matched.into_iter().take(size).cloned().collect(),
        })
    }

    async fn index_people(&self, people: &[CanonicalPerson]) -> Result<usize> {
        let mut docs = self.docs.write().await;
        for person in people {
            docs.insert(person.id, person.clone());
        }
        Ok(people.len())
    }

    async fn count(&self, deployment_id: i32) -> Result<u64> {
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|p| p.deployment_id == deployment_id && !p.deleted)
            .count() as u64)
    }

    async fn mark_deleted(&self, id: i64) -> Result<()> {
        let mut docs = self.docs.write().await;
        let person = docs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("document {} not found in index", id))?;
        person.deleted = true;
        Ok(())
    }
}

fn bool_matches(query: &BoolQuery, person: &CanonicalPerson) -> bool {
    if !query.filter.iter().all(|c| clause_matches(c, person)) {
        return false;
    }
    if !query.must.iter().all(|c| clause_matches(c, person)) {
        return false;
    }
    if query.must_not.iter().any(|c| clause_matches(c, person)) {
        return false;
    }

    let required = query.effective_minimum_should_match();
    required == 0 || query.should.iter().filter(|c| clause_matches(c, person)).count() >= required
}

fn clause_matches(clause: &Clause, person: &CanonicalPerson) -> bool {
    match clause {
        // Every text field is a normalized keyword, so a phrase is a whole-value match.
        Clause::Term(field, value) | Clause::Phrase(field, value) => {
            let wanted = normalize(*field, &value_text(value));
            field_values(person, *field)
                .iter()
                .any(|v| normalize(*field, v) == wanted)
        }
        Clause::Prefix(field, prefix) => {
            let wanted = normalize(*field, prefix);
            field_values(person, *field)
                .iter()
                .any(|v| normalize(*field, v).starts_with(&wanted))
        }
        Clause::Bool(query) => bool_matches(query, person),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn field_values(person: &CanonicalPerson, field: Field) -> Vec<String> {
    match field {
        Field::Id => vec![person.id.to_string()],
        Field::DeploymentId => vec![person.deployment_id.to_string()],
        Field::Deleted => vec![u8::from(person.deleted).to_string()],
        Field::Country => vec![person.country.clone()],
        Field::FirstName => vec![person.first_name.clone()],
        Field::MiddleName => vec![person.middle_name.clone()],
        Field::LastName | Field::LastNameLocalized => vec![person.last_name.clone()],
        Field::Aliases => person.aliases.clone(),
        Field::NameKeyword | Field::NameKeywordLocalized => vec![person.name_keyword.clone()],
        Field::NameKeywordSquash | Field::NameKeywordSquashLocalized => {
            vec![person.name_keyword_squash.clone()]
        }
        Field::NameKeywordRaw => vec![person.name_keyword_raw.clone()],
    }
}

/// Mirrors the normalizers of the index mapping.
fn normalize(field: Field, value: &str) -> String {
    match field {
        Field::Id | Field::DeploymentId | Field::Deleted => value.to_string(),
        Field::NameKeyword | Field::NameKeywordSquash => ascii_fold(value),
        f if f.is_localized() => german_fold(value),
        _ => ascii_fold(&value.to_lowercase()),
    }
}

/// Decomposes and drops combining marks, plus the few letters NFD leaves alone.
pub fn ascii_fold(value: &str) -> String {
    let mut folded = String::with_capacity(value.len());
    for c in value.nfd().filter(|c| !is_combining_mark(*c)) {
        match c {
            'ß' => folded.push_str("ss"),
            'æ' => folded.push_str("ae"),
            'Æ' => folded.push_str("AE"),
            'ø' => folded.push('o'),
            'Ø' => folded.push('O'),
            'ł' => folded.push('l'),
            'Ł' => folded.push('L'),
            'đ' => folded.push('d'),
            'Đ' => folded.push('D'),
            _ => folded.push(c),
        }
    }
    folded
}

/// Lowercase, German normalization (ä/ae -> a, ö/oe -> o, ü/ue -> u, ß -> ss), then ASCII folding.
pub fn german_fold(value: &str) -> String {
    let lower = value.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut out = String::with_capacity(lower.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            'ä' => out.push('a'),
            'ö' => out.push('o'),
            'ü' => out.push('u'),
            'ß' => out.push_str("ss"),
            'a' | 'o' | 'u' if chars.get(i + 1) == Some(&'e') => {
                // "que" keeps its e
                if c == 'u' && i > 0 && chars[i - 1] == 'q' {
                    out.push(c);
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    ascii_fold(&out)
}
