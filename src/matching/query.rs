// src/matching/query.rs - Query construction for the match strategies
//
// Queries are built as a small boolean tree. The Elasticsearch adapter renders
// it to the query DSL; the in-memory index evaluates it directly.

use serde_json::{json, Map, Value};

use crate::error::{MatchError, MatchResult};
use crate::models::core::ExclusionSet;

/// ISO3 codes the OneKey export uses, mapped to the country names stored on KOL locations.
pub const COUNTRY_CODES: [(&str, &str); 16] = [
    ("AUT", "Austria"),
    ("BEL", "Belgium"),
    ("CHE", "Switzerland"),
    ("DEU", "Germany"),
    ("DNK", "Denmark"),
    ("ESP", "Spain"),
    ("FIN", "Finland"),
    ("FRA", "France"),
    ("GBR", "United Kingdom"),
    ("IRL", "Ireland"),
    ("ITA", "Italy"),
    ("NLD", "Netherlands"),
    ("NOR", "Norway"),
    ("PRT", "Portugal"),
    ("SWE", "Sweden"),
    ("WLF", "Wallis and Futuna"),
];

pub fn country_name(code: &str) -> Option<&'static str> {
    let code = code.trim().to_ascii_uppercase();
    COUNTRY_CODES
        .iter()
        .find(|(iso3, _)| *iso3 == code)
        .map(|(_, name)| *name)
}

/// Index fields the strategies query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    DeploymentId,
    Deleted,
    Country,
    FirstName,
    MiddleName,
    LastName,
    /// German-normalized, ASCII-folded variant of `ln`.
    LastNameLocalized,
    Aliases,
    NameKeyword,
    NameKeywordLocalized,
    NameKeywordSquash,
    NameKeywordSquashLocalized,
    /// Squash key, lowercased and ASCII-folded.
    NameKeywordRaw,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::DeploymentId => "did",
            Field::Deleted => "deleted",
            Field::Country => "country",
            Field::FirstName => "fn",
            Field::MiddleName => "mn",
            Field::LastName => "ln",
            Field::LastNameLocalized => "ln.german",
            Field::Aliases => "aliases",
            Field::NameKeyword => "nameKeyword",
            Field::NameKeywordLocalized => "nameKeyword.german",
            Field::NameKeywordSquash => "nameKeywordSquash",
            Field::NameKeywordSquashLocalized => "nameKeywordSquash.german",
            Field::NameKeywordRaw => "nameKeywordRaw",
        }
    }

    /// Case-insensitive keyword fields (lowercase + ASCII folding normalizer).
    pub fn is_normalized(&self) -> bool {
        matches!(
            self,
            Field::Country
                | Field::FirstName
                | Field::MiddleName
                | Field::LastName
                | Field::Aliases
                | Field::NameKeywordRaw
        ) || self.is_localized()
    }

    pub fn is_localized(&self) -> bool {
        matches!(
            self,
            Field::LastNameLocalized | Field::NameKeywordLocalized | Field::NameKeywordSquashLocalized
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Exact value, not analyzed.
    Term(Field, Value),
    /// Analyzed phrase match.
    Phrase(Field, Value),
    Prefix(Field, String),
    Bool(BoolQuery),
}

impl Clause {
    pub fn term(field: Field, value: impl Into<Value>) -> Self {
        Clause::Term(field, value.into())
    }

    pub fn phrase(field: Field, value: impl Into<Value>) -> Self {
        Clause::Phrase(field, value.into())
    }

    pub fn prefix(field: Field, value: impl Into<String>) -> Self {
        Clause::Prefix(field, value.into())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Clause::Term(field, value) => json!({ "term": { field.as_str(): value } }),
            Clause::Phrase(field, value) => json!({ "match_phrase": { field.as_str(): value } }),
            Clause::Prefix(field, value) if field.is_normalized() => json!({
                "prefix": { field.as_str(): { "value": value, "case_insensitive": true } }
            }),
            Clause::Prefix(field, value) => json!({ "prefix": { field.as_str(): value } }),
            Clause::Bool(query) => query.to_json(),
        }
    }
}

impl From<BoolQuery> for Clause {
    fn from(query: BoolQuery) -> Self {
        Clause::Bool(query)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub filter: Vec<Clause>,
    pub must: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub should: Vec<Clause>,
    pub minimum_should_match: Option<usize>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: impl Into<Clause>) -> Self {
        self.filter.push(clause.into());
        self
    }

    pub fn require(mut self, clause: impl Into<Clause>) -> Self {
        self.must.push(clause.into());
        self
    }

    pub fn exclude(mut self, clause: impl Into<Clause>) -> Self {
        self.must_not.push(clause.into());
        self
    }

    pub fn should(mut self, clause: impl Into<Clause>) -> Self {
        self.should.push(clause.into());
        self
    }

    pub fn minimum_should_match(mut self, n: usize) -> Self {
        self.minimum_should_match = Some(n);
        self
    }

    /// Adds the last-name requirement: the exact phrase, OR-ed with the
    /// localized field when the name is not plain ASCII.
    pub fn with_last_name(self, last_name: &str) -> Self {
        self.require(last_name_clause(last_name))
    }

    /// Number of should-clauses that must match. Elasticsearch's default is 1
    /// when a bool query has no filter/must context and 0 otherwise.
    pub fn effective_minimum_should_match(&self) -> usize {
        match self.minimum_should_match {
            Some(n) => n,
            None if self.should.is_empty() => 0,
            None if self.filter.is_empty() && self.must.is_empty() => 1,
            None => 0,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (key, clauses) in [
            ("filter", &self.filter),
            ("must", &self.must),
            ("must_not", &self.must_not),
            ("should", &self.should),
        ] {
            if !clauses.is_empty() {
                body.insert(
                    key.to_string(),
                    Value::Array(clauses.iter().map(Clause::to_json).collect()),
                );
            }
        }
        if let Some(n) = self.minimum_should_match {
            body.insert("minimum_should_match".to_string(), json!(n));
        }
        json!({ "bool": Value::Object(body) })
    }
}

pub fn last_name_clause(last_name: &str) -> BoolQuery {
    let mut query = BoolQuery::new().should(Clause::phrase(Field::LastName, last_name));
    if !last_name.is_ascii() {
        query = query.should(Clause::phrase(Field::LastNameLocalized, last_name));
    }
    query.minimum_should_match(1)
}

/// Scope shared by every strategy query: one deployment, live documents only,
/// optionally one country, never an already-claimed id.
pub fn base_query(
    deployment_id: i32,
    country_code: Option<&str>,
    exclusions: &ExclusionSet,
) -> MatchResult<BoolQuery> {
    let mut query = BoolQuery::new()
        .filter(Clause::term(Field::DeploymentId, deployment_id))
        .filter(Clause::term(Field::Deleted, 0));

    if let Some(code) = country_code.filter(|c| !c.trim().is_empty()) {
        let name =
            country_name(code).ok_or_else(|| MatchError::UnknownCountry(code.to_string()))?;
        query = query.filter(Clause::phrase(Field::Country, name));
    }

    for id in exclusions.iter() {
        query = query.exclude(Clause::term(Field::Id, id));
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_query_scopes_deployment_and_deleted() {
        let query = base_query(9, None, &ExclusionSet::new()).unwrap();
        let rendered = query.to_json();
        assert_eq!(
            rendered,
            json!({
                "bool": {
                    "filter": [
                        { "term": { "did": 9 } },
                        { "term": { "deleted": 0 } }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_unknown_country_is_an_error() {
        let err = base_query(1, Some("XYZ"), &ExclusionSet::new()).unwrap_err();
        assert!(matches!(err, MatchError::UnknownCountry(ref code) if code == "XYZ"));
    }

    #[test]
    fn test_country_resolves_through_table() {
        let query = base_query(1, Some("deu"), &ExclusionSet::new()).unwrap();
        assert!(query
            .filter
            .contains(&Clause::phrase(Field::Country, "Germany")));

        // Empty code means no country restriction
        let query = base_query(1, Some(""), &ExclusionSet::new()).unwrap();
        assert_eq!(query.filter.len(), 2);
    }

    #[test]
    fn test_exclusions_are_negated_clauses() {
        let exclusions = ExclusionSet::from_ids([42, 7]);
        let query = base_query(1, None, &exclusions).unwrap();
        assert_eq!(
            query.must_not,
            vec![Clause::term(Field::Id, 7), Clause::term(Field::Id, 42)]
        );
    }

    #[test]
    fn test_last_name_adds_localized_field_only_for_non_ascii() {
        let ascii = last_name_clause("Braun");
        assert_eq!(ascii.should.len(), 1);

        let umlaut = last_name_clause("Hübel");
        assert_eq!(
            umlaut.should,
            vec![
                Clause::phrase(Field::LastName, "Hübel"),
                Clause::phrase(Field::LastNameLocalized, "Hübel"),
            ]
        );
        assert_eq!(umlaut.minimum_should_match, Some(1));
    }

    #[test]
    fn test_nested_bool_rendering() {
        let query = BoolQuery::new()
            .require(
                BoolQuery::new()
                    .should(Clause::phrase(Field::FirstName, "Jorge"))
                    .should(Clause::phrase(Field::Aliases, "Jorge"))
                    .minimum_should_match(1),
            )
            .exclude(Clause::term(Field::MiddleName, ""))
            .filter(Clause::prefix(Field::FirstName, "J"));

        let rendered = query.to_json();
        assert_eq!(rendered["bool"]["must"][0]["bool"]["minimum_should_match"], 1);
        assert_eq!(rendered["bool"]["must_not"][0], json!({ "term": { "mn": "" } }));
        assert_eq!(rendered["bool"]["filter"][0], json!({ "prefix": { "fn": { "value": "J", "case_insensitive": true } } }));
    }

    #[test]
    fn test_effective_minimum_should_match_defaults() {
        let only_should = BoolQuery::new().should(Clause::term(Field::NameKeyword, "a"));
        assert_eq!(only_should.effective_minimum_should_match(), 1);

        let with_filter = only_should.clone().filter(Clause::term(Field::Deleted, 0));
        assert_eq!(with_filter.effective_minimum_should_match(), 0);

        assert_eq!(with_filter.minimum_should_match(1).effective_minimum_should_match(), 1);
    }
}
