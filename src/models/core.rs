// src/models/core.rs - Domain types shared by the canonicalizer, the cascade and the writers
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::matching::canonical::CanonicalFields;

/// One internal person ("KOL") as stored in the search index, per deployment.
///
/// Field names follow the index document layout (`fn`, `mn`, `ln`, `did`, ...),
/// so a hit's `_source` decodes straight into this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPerson {
    pub id: i64,
    #[serde(rename = "did")]
    pub deployment_id: i32,
    #[serde(rename = "fn", default, deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(rename = "mn", default, deserialize_with = "null_as_default")]
    pub middle_name: String,
    #[serde(rename = "ln", default, deserialize_with = "null_as_default")]
    pub last_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "nameKeyword", default, deserialize_with = "null_as_default")]
    pub name_keyword: String,
    #[serde(rename = "nameKeywordSquash", default, deserialize_with = "null_as_default")]
    pub name_keyword_squash: String,
    #[serde(rename = "nameKeywordRaw", default, deserialize_with = "null_as_default")]
    pub name_keyword_raw: String,
    #[serde(rename = "fnDash", default)]
    pub first_name_dash: bool,
    #[serde(rename = "fnDot", default)]
    pub first_name_dot: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub country: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(rename = "position", default, deserialize_with = "null_as_default")]
    pub rank_position: i64,
    #[serde(default, with = "deleted_flag")]
    pub deleted: bool,
}

impl CanonicalPerson {
    /// Builds the index document from canonicalized name fields. The squash keys
    /// always come from the canonicalizer, never from stored data.
    pub fn from_canonical(
        id: i64,
        deployment_id: i32,
        fields: CanonicalFields,
        country: &str,
        city: &str,
        rank_position: i64,
    ) -> Self {
        Self {
            id,
            deployment_id,
            first_name: fields.first_name,
            middle_name: fields.middle_name,
            last_name: fields.last_name,
            name: fields.name.clone(),
            name_keyword: fields.name,
            name_keyword_squash: fields.squash.clone(),
            name_keyword_raw: fields.squash,
            first_name_dash: fields.first_name_dash,
            first_name_dot: fields.first_name_dot,
            aliases: fields.aliases,
            country: country.to_string(),
            city: city.to_string(),
            rank_position,
            deleted: false,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The index stores the soft-delete flag as 0/1 and the term filters query it that way.
mod deleted_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Int(i64),
        }

        Ok(match Option::<Flag>::deserialize(deserializer)? {
            Some(Flag::Bool(b)) => b,
            Some(Flag::Int(i)) => i != 0,
            None => false,
        })
    }
}

/// A OneKey CRM row, read once per matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub source_id: Option<String>,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub org_name: String,
    pub city: String,
    pub country: String,
}

impl ExternalRecord {
    pub fn new(source_id: Option<String>, first_name: &str, middle_name: &str, last_name: &str) -> Self {
        let (first_name, middle_name) = split_middle_name(first_name.trim(), middle_name.trim());
        Self {
            source_id,
            first_name,
            middle_name,
            last_name: last_name.trim().to_string(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, city: &str, country: &str) -> Self {
        self.city = city.trim().to_string();
        self.country = country.trim().to_string();
        self
    }

    /// Builds a record from a CRM export row. Absent fields read as empty strings.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| fields.get(*k))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let source_id = Some(get(&["SRC_CUST_ID"])).filter(|s| !s.is_empty());
        let mut record = Self::new(
            source_id,
            &get(&["FIRST_NAME"]),
            &get(&["MIDDLE_NAME"]),
            &get(&["LAST_NAME"]),
        )
        .with_location(&get(&["CITY"]), &get(&["CNTRY", "COUNTRY"]));
        record.org_name = get(&["CUST_NAME", "ORG_NAME"]);
        record
    }

    pub fn display_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// If there is no middle name, take it from the first name: split on a space
/// first, then on a hyphen. The first token stays the first name.
pub fn split_middle_name(first_name: &str, middle_name: &str) -> (String, String) {
    if !middle_name.is_empty() {
        return (first_name.to_string(), middle_name.to_string());
    }

    for separator in [' ', '-'] {
        let parts: Vec<&str> = first_name.split(separator).collect();
        if parts.len() > 1 {
            return (parts[0].to_string(), parts[1..].join(" ").trim().to_string());
        }
    }

    (first_name.to_string(), String::new())
}

/// Which cascade step produced a candidate. Declaration order is cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyTag {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "foreign")]
    Foreign,
    #[serde(rename = "short")]
    Short,
    #[serde(rename = "nomid")]
    NoMiddleName,
    #[serde(rename = "onemid1")]
    OneMiddleName,
    #[serde(rename = "onemid2")]
    OneMiddleName2,
    #[serde(rename = "initials")]
    ThreeInitials,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Simple => "simple",
            StrategyTag::Foreign => "foreign",
            StrategyTag::Short => "short",
            StrategyTag::NoMiddleName => "nomid",
            StrategyTag::OneMiddleName => "onemid1",
            StrategyTag::OneMiddleName2 => "onemid2",
            StrategyTag::ThreeInitials => "initials",
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFlags {
    /// The external first name matched one of the candidate's aliases, not its first name.
    pub used_alias: bool,
    /// At least one side of the comparison has no middle name.
    pub no_middle_name: bool,
    /// The match relied on first-letter or initials compression.
    pub initials_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub person: CanonicalPerson,
    pub strategy: StrategyTag,
    pub flags: MatchFlags,
}

impl MatchCandidate {
    pub fn new(person: CanonicalPerson, strategy: StrategyTag, external: &ExternalRecord) -> Self {
        let used_alias = person.first_name != external.first_name
            && person.aliases.iter().any(|a| a == &external.first_name);
        let no_middle_name = external.middle_name.is_empty() || person.middle_name.is_empty();
        let initials_only = matches!(
            strategy,
            StrategyTag::NoMiddleName | StrategyTag::ThreeInitials
        ) || (strategy == StrategyTag::Short
            && (person.first_name.chars().count() == 1 || person.middle_name.chars().count() == 1));

        Self {
            person,
            strategy,
            flags: MatchFlags {
                used_alias,
                no_middle_name,
                initials_only,
            },
        }
    }

    pub fn internal_id(&self) -> i64 {
        self.person.id
    }
}

/// Internal ids already claimed within one cascade pass. Strategies take it by
/// value and hand back the grown set, so it only ever gains ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet(BTreeSet<i64>);

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn with(mut self, id: i64) -> Self {
        self.0.insert(id);
        self
    }

    pub fn with_all<I: IntoIterator<Item = i64>>(mut self, ids: I) -> Self {
        self.0.extend(ids);
        self
    }

    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    pub fn is_superset_of(&self, other: &ExclusionSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }
}

/// An accepted external-to-internal link. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Linkage {
    pub external_id: String,
    pub internal_id: i64,
    pub deployment_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_decodes_index_document() {
        let doc = serde_json::json!({
            "id": 5711743,
            "did": 1,
            "deleted": 0,
            "position": 12,
            "name": "Ralf F Dittrich",
            "nameKeyword": "Ralf F Dittrich",
            "nameKeywordSquash": "RalfFDittrich",
            "nameKeywordRaw": "RalfFDittrich",
            "fn": "Ralf",
            "mn": "F",
            "ln": "Dittrich",
            "fnDash": false,
            "fnDot": false,
            "country": "Germany",
            "city": "Osnabrück",
            "aliases": null
        });

        let person: CanonicalPerson = serde_json::from_value(doc).unwrap();
        assert_eq!(person.id, 5711743);
        assert_eq!(person.deployment_id, 1);
        assert_eq!(person.middle_name, "F");
        assert!(person.aliases.is_empty());
        assert!(!person.deleted);

        let encoded = serde_json::to_value(&person).unwrap();
        assert_eq!(encoded["deleted"], 0);
        assert_eq!(encoded["fn"], "Ralf");
    }

    #[test]
    fn test_deleted_flag_accepts_bool_and_int() {
        let as_int: CanonicalPerson =
            serde_json::from_value(serde_json::json!({"id": 1, "did": 2, "deleted": 1})).unwrap();
        let as_bool: CanonicalPerson =
            serde_json::from_value(serde_json::json!({"id": 1, "did": 2, "deleted": true})).unwrap();
        assert!(as_int.deleted);
        assert!(as_bool.deleted);
    }

    #[test]
    fn test_external_record_splits_middle_name() {
        let spaced = ExternalRecord::new(None, "Jorge Eduardo", "", "Cortes");
        assert_eq!(spaced.first_name, "Jorge");
        assert_eq!(spaced.middle_name, "Eduardo");

        let hyphenated = ExternalRecord::new(None, "Xin-xia", "", "Li");
        assert_eq!(hyphenated.first_name, "Xin");
        assert_eq!(hyphenated.middle_name, "xia");

        let explicit = ExternalRecord::new(None, "Hans-Peter", "K", "Meyer");
        assert_eq!(explicit.first_name, "Hans-Peter");
        assert_eq!(explicit.middle_name, "K");
    }

    #[test]
    fn test_external_record_from_fields() {
        let mut row = HashMap::new();
        row.insert("SRC_CUST_ID".to_string(), "WDEM02118277".to_string());
        row.insert("FIRST_NAME".to_string(), "Ralf".to_string());
        row.insert("LAST_NAME".to_string(), "Dittrich".to_string());
        row.insert("CITY".to_string(), "OSNABRÜCK".to_string());
        row.insert("CNTRY".to_string(), "DEU".to_string());
        row.insert("CUST_NAME".to_string(), "Klinikum Osnabrück".to_string());

        let record = ExternalRecord::from_fields(&row);
        assert_eq!(record.source_id.as_deref(), Some("WDEM02118277"));
        assert_eq!(record.middle_name, "");
        assert_eq!(record.country, "DEU");
        assert_eq!(record.org_name, "Klinikum Osnabrück");
        assert_eq!(record.display_name(), "Ralf Dittrich");
    }

    #[test]
    fn test_exclusion_set_only_grows() {
        let before = ExclusionSet::from_ids([3, 1]);
        let after = before.clone().with(7).with_all([1, 9]);
        assert!(after.is_superset_of(&before));
        assert_eq!(after.iter().collect::<Vec<_>>(), vec![1, 3, 7, 9]);
    }

    #[test]
    fn test_candidate_flags() {
        let person = CanonicalPerson {
            aliases: vec!["Bill".to_string()],
            ..CanonicalPerson::from_canonical(
                10,
                1,
                crate::matching::canonical::canonicalize("William", "", "Gates", &[]),
                "",
                "",
                0,
            )
        };
        let external = ExternalRecord::new(None, "Bill", "", "Gates");
        let candidate = MatchCandidate::new(person, StrategyTag::OneMiddleName2, &external);
        assert!(candidate.flags.used_alias);
        assert!(candidate.flags.no_middle_name);
        assert!(!candidate.flags.initials_only);
    }
}
