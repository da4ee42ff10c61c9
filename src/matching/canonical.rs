// src/matching/canonical.rs - Name canonicalization for the KOL search index
//
// Turns a raw first/middle/last triple plus alias sources into the name fields
// stored on every index document. Pure: no I/O, never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator used by the ETL when it aggregates alias rows into one string.
pub const ALIAS_SEPARATOR: &str = " ;;; ";

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalFields {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    /// Full name, original casing and diacritics.
    pub name: String,
    /// `name` with spaces and hyphens removed.
    pub squash: String,
    pub aliases: Vec<String>,
    pub first_name_dash: bool,
    pub first_name_dot: bool,
}

pub fn canonicalize(first: &str, middle: &str, last: &str, alias_sources: &[&str]) -> CanonicalFields {
    let mut first_name = clean(first);
    let mut middle_name = clean(middle);
    let last_name = clean(last);

    recover_middle_name(&mut first_name, &mut middle_name);
    trim_duplicated_initial(&first_name, &mut middle_name);

    let middle_name = clean(&middle_name.replace('.', ""));
    let name = full_name(&first_name, &middle_name, &last_name);
    let squash = squash(&name);

    CanonicalFields {
        first_name_dash: first_name.contains('-'),
        first_name_dot: first_name.contains('.'),
        first_name,
        middle_name,
        last_name,
        name,
        squash,
        aliases: merge_aliases(alias_sources),
    }
}

/// "Jorge Eduardo" with no middle name becomes "Jorge" + "Eduardo"; a space
/// split wins over a hyphen split. A one-letter middle name is replaced by the
/// split-off remainder when the remainder starts with that letter.
fn recover_middle_name(first_name: &mut String, middle_name: &mut String) {
    for separator in [' ', '-'] {
        let (head, rest) = {
            let parts: Vec<&str> = first_name.split(separator).collect();
            if parts.len() < 2 {
                continue;
            }
            (parts[0].to_string(), parts[1..].join(&separator.to_string()))
        };

        if middle_name.is_empty()
            || (middle_name.chars().count() == 1 && first_char(&rest) == *middle_name)
        {
            *first_name = head;
            *middle_name = rest;
            return;
        }
    }
}

/// Adam A.M. Smith -> Adam M. Smith. Only when the first name is a single token.
fn trim_duplicated_initial(first_name: &str, middle_name: &mut String) {
    if first_name.contains([' ', '.', '-']) {
        return;
    }

    let initial = first_char(first_name);
    for separator in [' ', '-', '.'] {
        let parts: Vec<&str> = middle_name.split(separator).collect();
        if parts.len() > 1 && parts[0] == initial {
            let trimmed = parts[1..].join(&separator.to_string());
            *middle_name = trimmed;
        }
    }
}

fn clean(value: &str) -> String {
    WHITESPACE_RUN.replace_all(value.trim(), " ").into_owned()
}

pub fn full_name(first_name: &str, middle_name: &str, last_name: &str) -> String {
    let name = if middle_name.is_empty() {
        format!("{} {}", first_name, last_name)
    } else {
        format!("{} {} {}", first_name, middle_name, last_name)
    };
    name.trim().to_string()
}

/// Spaces and hyphens removed.
pub fn squash(name: &str) -> String {
    name.chars().filter(|c| *c != ' ' && *c != '-').collect()
}

/// First character as a string, empty for an empty input.
pub fn first_char(value: &str) -> String {
    value.chars().next().map(String::from).unwrap_or_default()
}

/// Unions every alias source (each a `" ;;; "`-joined list) into a sorted,
/// deduplicated list. Empty entries and dotted initials such as "J." are dropped.
pub fn merge_aliases(sources: &[&str]) -> Vec<String> {
    let set: BTreeSet<&str> = sources
        .iter()
        .flat_map(|source| source.split(ALIAS_SEPARATOR))
        .filter(|alias| !alias.is_empty() && !is_dotted_initial(alias))
        .collect();

    set.into_iter().map(String::from).collect()
}

fn is_dotted_initial(alias: &str) -> bool {
    alias.chars().count() == 2 && alias.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_name_recovered_from_first_name() {
        let fields = canonicalize("Jorge Eduardo", "", "Cortes", &[]);
        assert_eq!(fields.first_name, "Jorge");
        assert_eq!(fields.middle_name, "Eduardo");
        assert_eq!(fields.name, "Jorge Eduardo Cortes");
        assert_eq!(fields.squash, "JorgeEduardoCortes");
    }

    #[test]
    fn test_hyphen_split_only_when_no_space() {
        let fields = canonicalize("Hans-Peter", "", "Meyer", &[]);
        assert_eq!(fields.first_name, "Hans");
        assert_eq!(fields.middle_name, "Peter");

        let fields = canonicalize("Anna Lena-Marie", "", "Vogt", &[]);
        assert_eq!(fields.first_name, "Anna");
        assert_eq!(fields.middle_name, "Lena-Marie");
    }

    #[test]
    fn test_hyphen_split_keeps_hyphens_in_remainder() {
        let fields = canonicalize("Hans-Peter-Karl", "", "Meyer", &[]);
        assert_eq!(fields.first_name, "Hans");
        assert_eq!(fields.middle_name, "Peter-Karl");
        assert_eq!(fields.name, "Hans Peter-Karl Meyer");
        assert_eq!(fields.squash, "HansPeterKarlMeyer");

        let fields = canonicalize("Hans-Peter-Karl", "P", "Meyer", &[]);
        assert_eq!(fields.middle_name, "Peter-Karl");
    }

    #[test]
    fn test_single_letter_middle_name_prefers_fuller_remainder() {
        let fields = canonicalize("Ralf Friedrich", "F", "Dittrich", &[]);
        assert_eq!(fields.first_name, "Ralf");
        assert_eq!(fields.middle_name, "Friedrich");

        // Different letter: keep what we were given
        let fields = canonicalize("Ralf Friedrich", "K", "Dittrich", &[]);
        assert_eq!(fields.first_name, "Ralf Friedrich");
        assert_eq!(fields.middle_name, "K");
    }

    #[test]
    fn test_duplicated_initial_trimmed_and_periods_stripped() {
        let fields = canonicalize("Adam", "A.M.", "Smith", &[]);
        assert_eq!(fields.first_name, "Adam");
        assert_eq!(fields.middle_name, "M");
        assert_eq!(fields.name, "Adam M Smith");

        let fields = canonicalize("Adam", "A M", "Smith", &[]);
        assert_eq!(fields.middle_name, "M");

        // A lone initial equal to the first letter is left alone
        let fields = canonicalize("Adam", "A", "Smith", &[]);
        assert_eq!(fields.middle_name, "A");
    }

    #[test]
    fn test_squash_keys() {
        assert_eq!(canonicalize("Xin-xia", "", "Li", &[]).squash, "XinxiaLi");
        assert_eq!(canonicalize("Xin", "", "Li", &[]).squash, "XinLi");
        assert_ne!(
            canonicalize("Xin-xia", "", "Li", &[]).squash,
            canonicalize("Xin", "", "Li", &[]).squash
        );
        assert_eq!(squash("Anne-Marie de la Cruz"), "AnneMariedelaCruz");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let a = canonicalize(" Jürgen  K. ", "", "Müller-Lüdenscheidt", &["Jurgen"]);
        let b = canonicalize(" Jürgen  K. ", "", "Müller-Lüdenscheidt", &["Jurgen"]);
        assert_eq!(a.squash.as_bytes(), b.squash.as_bytes());
        assert_eq!(a, b);
        assert_eq!(a.first_name, "Jürgen");
        assert_eq!(a.middle_name, "K");
    }

    #[test]
    fn test_empty_inputs_give_best_effort_record() {
        let fields = canonicalize("", "", "", &[]);
        assert_eq!(fields.name, "");
        assert_eq!(fields.squash, "");
        assert!(fields.aliases.is_empty());

        let fields = canonicalize("", "", "Braun", &[]);
        assert_eq!(fields.name, "Braun");
    }

    #[test]
    fn test_first_name_flags() {
        let fields = canonicalize("J.", "", "Cortes", &[]);
        assert!(fields.first_name_dot);
        assert!(!fields.first_name_dash);
    }

    #[test]
    fn test_alias_merge_deduplicates_and_drops_initials() {
        let merged = merge_aliases(&["Bill ;;; Bill ;;; B.", "William"]);
        assert_eq!(merged, vec!["Bill".to_string(), "William".to_string()]);
    }

    #[test]
    fn test_alias_merge_is_order_independent() {
        let a = merge_aliases(&["Bob ;;; Rob", "", "Robert ;;; R.", "Bobby"]);
        let b = merge_aliases(&["Bobby", "Robert ;;; R.", "Bob ;;; Rob", ""]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_alias_merge_keeps_longer_dotted_tokens() {
        let merged = merge_aliases(&["Ch. ;;; J.P."]);
        assert_eq!(merged, vec!["Ch.".to_string(), "J.P.".to_string()]);
    }

    #[test]
    fn test_aliases_flow_into_fields() {
        let fields = canonicalize("William", "", "Gates", &["Bill", "Will ;;; W."]);
        assert_eq!(fields.aliases, vec!["Bill".to_string(), "Will".to_string()]);
    }
}
