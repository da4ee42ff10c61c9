// src/matching/cascade.rs - The ordered strategy cascade and its public entry points
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{MatchError, MatchResult};
use crate::matching::conflict::ReferenceCounter;
use crate::matching::query::{base_query, Clause, Field};
use crate::matching::strategies::{run_strategy, StrategyContext};
use crate::models::core::{ExclusionSet, ExternalRecord, MatchCandidate, StrategyTag};
use crate::search::SearchBackend;
use crate::utils::config::MatchingConfig;

/// Cascade order. Precision drops from one step to the next.
pub const CASCADE: [StrategyTag; 7] = [
    StrategyTag::Simple,
    StrategyTag::Foreign,
    StrategyTag::Short,
    StrategyTag::NoMiddleName,
    StrategyTag::OneMiddleName,
    StrategyTag::OneMiddleName2,
    StrategyTag::ThreeInitials,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CascadeMode {
    /// Stop at the first strategy that accepts anything.
    FirstMatch,
    /// Run every strategy and merge what they accept.
    #[default]
    CollectAll,
}

impl CascadeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeMode::FirstMatch => "first-match",
            CascadeMode::CollectAll => "collect-all",
        }
    }
}

impl fmt::Display for CascadeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CascadeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-match" | "first_match" => Ok(CascadeMode::FirstMatch),
            "collect-all" | "collect_all" => Ok(CascadeMode::CollectAll),
            other => Err(format!("unknown cascade mode '{}'", other)),
        }
    }
}

/// Accepted candidates keyed by internal id.
pub type CandidateMap = BTreeMap<i64, MatchCandidate>;

#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub candidates: CandidateMap,
    /// Exclusion set as it stood after each strategy that ran.
    pub exclusion_trail: Vec<(StrategyTag, ExclusionSet)>,
}

/// Resolves external records against one search backend.
#[derive(Clone)]
pub struct Resolver {
    backend: Arc<dyn SearchBackend>,
    reference: Option<Arc<dyn ReferenceCounter>>,
    mode: CascadeMode,
    result_size: usize,
    verification_size: usize,
}

impl Resolver {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            reference: None,
            mode: CascadeMode::default(),
            result_size: 10,
            verification_size: 100,
        }
    }

    pub fn from_config(backend: Arc<dyn SearchBackend>, config: &MatchingConfig) -> Self {
        Self::new(backend)
            .with_mode(config.cascade_mode)
            .with_result_sizes(config.search_result_size, config.verification_result_size)
    }

    pub fn with_reference_counter(mut self, reference: Arc<dyn ReferenceCounter>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_mode(mut self, mode: CascadeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_result_sizes(mut self, result_size: usize, verification_size: usize) -> Self {
        self.result_size = result_size.max(1);
        self.verification_size = verification_size.max(1);
        self
    }

    /// Single-record entry point for callers that hold loose name fields.
    #[allow(clippy::too_many_arguments)]
    pub async fn resolve_names(
        &self,
        first_name: &str,
        middle_name: &str,
        last_name: &str,
        country: &str,
        city: &str,
        deployment_id: i32,
        exclude_ids: &[i64],
    ) -> MatchResult<CandidateMap> {
        let external =
            ExternalRecord::new(None, first_name, middle_name, last_name).with_location(city, country);
        self.resolve(&external, deployment_id, exclude_ids).await
    }

    pub async fn resolve(
        &self,
        external: &ExternalRecord,
        deployment_id: i32,
        exclude_ids: &[i64],
    ) -> MatchResult<CandidateMap> {
        Ok(self
            .run_cascade(external, deployment_id, exclude_ids)
            .await?
            .candidates)
    }

    /// Runs the strategies in order, threading the exclusion set through them.
    /// A query-construction or backend error aborts the whole pass.
    pub async fn run_cascade(
        &self,
        external: &ExternalRecord,
        deployment_id: i32,
        exclude_ids: &[i64],
    ) -> MatchResult<CascadeOutcome> {
        let mut outcome = CascadeOutcome::default();

        if external.first_name.trim().is_empty() {
            debug!("No first name on '{}', nothing to match", external.display_name());
            return Ok(outcome);
        }
        if external.last_name.trim().is_empty() {
            return Err(MatchError::MissingField("last_name"));
        }

        let ctx = StrategyContext {
            backend: self.backend.as_ref(),
            reference: self.reference.as_deref(),
            external,
            deployment_id,
            result_size: self.result_size,
            verification_size: self.verification_size,
        };

        let mut exclusions = ExclusionSet::from_ids(exclude_ids.iter().copied());
        for tag in CASCADE {
            let step = run_strategy(tag, &ctx, exclusions, outcome.candidates.len()).await?;
            exclusions = step.exclusions;
            outcome.exclusion_trail.push((tag, exclusions.clone()));

            let accepted_any = !step.accepted.is_empty();
            for candidate in step.accepted {
                outcome.candidates.insert(candidate.internal_id(), candidate);
            }

            if accepted_any && self.mode == CascadeMode::FirstMatch {
                break;
            }
        }

        Ok(outcome)
    }

    /// Looks up one live internal person by id, deployment and last name, then
    /// runs the cascade on that person's own name, excluding the person.
    pub async fn resolve_duplicates_of(
        &self,
        id: i64,
        deployment_id: i32,
        last_name: &str,
    ) -> MatchResult<CandidateMap> {
        let lookup = base_query(deployment_id, None, &ExclusionSet::new())?
            .filter(Clause::term(Field::Id, id))
            .with_last_name(last_name);
        let found = self.backend.search(&lookup, 2).await?;

        let person = match found.hits.into_iter().next() {
            Some(person) if found.total == 1 => person,
            _ => {
                return Err(MatchError::PersonNotFound {
                    id,
                    deployment_id,
                    hits: found.total,
                })
            }
        };

        // The stored country is a display name, so the lookup runs unscoped by country
        let external = ExternalRecord::new(
            None,
            &person.first_name,
            &person.middle_name,
            &person.last_name,
        );
        self.resolve(&external, deployment_id, &[id]).await
    }
}
