// src/matching/strategies.rs - The seven match strategies of the cascade
//
// Each strategy takes the exclusion set by value and hands back the grown set
// together with the candidates it accepted. Ambiguity is a "no match" outcome,
// logged through the strategy's MatchingLogger.

use std::collections::BTreeSet;

use crate::error::MatchResult;
use crate::matching::canonical::{first_char, full_name, squash};
use crate::matching::conflict::ReferenceCounter;
use crate::matching::query::{base_query, BoolQuery, Clause, Field};
use crate::models::core::{CanonicalPerson, ExclusionSet, ExternalRecord, MatchCandidate, StrategyTag};
use crate::search::{SearchBackend, SearchHits};
use crate::utils::progress_bars::logging::MatchingLogger;

/// Squash keys this short or shorter are too weak to match on ("MaLi" vs "MAli").
const MIN_SQUASH_KEY_CHARS: usize = 4;

/// Everything a strategy needs that stays fixed for one cascade pass.
pub struct StrategyContext<'a> {
    pub backend: &'a dyn SearchBackend,
    pub reference: Option<&'a dyn ReferenceCounter>,
    pub external: &'a ExternalRecord,
    pub deployment_id: i32,
    pub result_size: usize,
    pub verification_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub accepted: Vec<MatchCandidate>,
    pub exclusions: ExclusionSet,
}

impl StrategyOutcome {
    fn nothing(exclusions: ExclusionSet) -> Self {
        Self {
            accepted: Vec::new(),
            exclusions,
        }
    }

    fn accept(exclusions: ExclusionSet, accepted: Vec<MatchCandidate>) -> Self {
        let exclusions = exclusions.with_all(accepted.iter().map(MatchCandidate::internal_id));
        Self {
            accepted,
            exclusions,
        }
    }
}

impl<'a> StrategyContext<'a> {
    fn base(&self, exclusions: &ExclusionSet) -> MatchResult<BoolQuery> {
        base_query(self.deployment_id, Some(self.external.country.as_str()), exclusions)
    }

    /// Runs a query and drops any hit outside the requested deployment.
    async fn execute(&self, query: &BoolQuery, size: usize) -> MatchResult<SearchHits> {
        let mut hits = self.backend.search(query, size).await?;
        hits.hits
            .retain(|p| p.deployment_id == self.deployment_id && !p.deleted);
        Ok(hits)
    }

    fn candidates(&self, people: Vec<CanonicalPerson>, tag: StrategyTag) -> Vec<MatchCandidate> {
        people
            .into_iter()
            .map(|p| MatchCandidate::new(p, tag, self.external))
            .collect()
    }

    /// Drops every candidate for which the OneKey data holds another record
    /// named like `first_name` + last name. Needs both a counter and a source id.
    async fn conflict_filter(
        &self,
        logger: &MatchingLogger,
        first_name: &str,
        candidates: Vec<MatchCandidate>,
    ) -> MatchResult<Vec<MatchCandidate>> {
        let (counter, source_id) = match (self.reference, self.external.source_id.as_deref()) {
            (Some(counter), Some(source_id)) if !source_id.is_empty() => (counter, source_id),
            _ => return Ok(candidates),
        };

        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let others = counter
                .count_similar(first_name, &self.external.last_name, source_id)
                .await?;
            if others != 0 {
                logger.log_conflict_veto(candidate.internal_id(), first_name, others);
                continue;
            }
            kept.push(candidate);
        }
        Ok(kept)
    }
}

/// Runs one cascade step. `accumulated` is the number of candidates the earlier
/// steps have accepted for this record.
pub async fn run_strategy(
    tag: StrategyTag,
    ctx: &StrategyContext<'_>,
    exclusions: ExclusionSet,
    accumulated: usize,
) -> MatchResult<StrategyOutcome> {
    let logger = MatchingLogger::new(tag, &ctx.external.display_name(), ctx.deployment_id);
    logger.log_start(exclusions.len());

    let outcome = match tag {
        StrategyTag::Simple => simple(ctx, &logger, exclusions).await?,
        StrategyTag::Foreign => foreign(ctx, &logger, exclusions, accumulated).await?,
        StrategyTag::Short => short(ctx, &logger, exclusions).await?,
        StrategyTag::NoMiddleName => no_middle_name(ctx, &logger, exclusions).await?,
        StrategyTag::OneMiddleName => one_middle_name(ctx, &logger, exclusions).await?,
        StrategyTag::OneMiddleName2 => one_middle_name2(ctx, &logger, exclusions).await?,
        StrategyTag::ThreeInitials => three_initials(ctx, &logger, exclusions).await?,
    };

    let ids: Vec<i64> = outcome.accepted.iter().map(MatchCandidate::internal_id).collect();
    logger.log_accepted(&ids);
    Ok(outcome)
}

/// Full name plus the form with the middle name collapsed to its initial.
fn name_forms(external: &ExternalRecord) -> (String, String) {
    let name = full_name(&external.first_name, &external.middle_name, &external.last_name);
    let collapsed = if external.middle_name.is_empty() {
        name.clone()
    } else {
        full_name(
            &external.first_name,
            &first_char(&external.middle_name),
            &external.last_name,
        )
    };
    (name, collapsed)
}

fn first_name_or_alias(first_name: &str) -> BoolQuery {
    BoolQuery::new()
        .should(Clause::phrase(Field::FirstName, first_name))
        .should(Clause::phrase(Field::Aliases, first_name))
        .minimum_should_match(1)
}

/// Step 1: exact name keys, with and without the middle initial collapsed.
async fn simple(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    if ctx.external.first_name.trim().is_empty() {
        logger.log_skipped("no first name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let (name, collapsed) = name_forms(ctx.external);
    let squashed = squash(&name);
    let long_enough = squashed.chars().count() > MIN_SQUASH_KEY_CHARS;

    let mut query = ctx
        .base(&exclusions)?
        .should(Clause::term(Field::NameKeyword, name.as_str()));
    if long_enough {
        query = query
            .should(Clause::term(Field::NameKeywordSquash, squashed.as_str()))
            .should(Clause::term(Field::NameKeywordRaw, squashed.as_str()));
    }
    if collapsed != name {
        query = query.should(Clause::term(Field::NameKeyword, collapsed.as_str()));
        if long_enough {
            query = query.should(Clause::term(Field::NameKeywordSquash, squash(&collapsed)));
        }
    }
    let query = query.minimum_should_match(1);

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());

    let accepted = ctx.candidates(hits.hits, StrategyTag::Simple);
    Ok(StrategyOutcome::accept(exclusions, accepted))
}

/// Step 2: the simple keys again, through the German-folded sub-fields.
async fn foreign(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
    accumulated: usize,
) -> MatchResult<StrategyOutcome> {
    if accumulated == 0 {
        logger.log_skipped("no earlier candidates");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let (name, collapsed) = name_forms(ctx.external);
    let squashed = squash(&name);
    let long_enough = squashed.chars().count() > MIN_SQUASH_KEY_CHARS;

    let mut query = ctx
        .base(&exclusions)?
        .should(Clause::term(Field::NameKeywordLocalized, name.as_str()));
    if long_enough {
        query = query.should(Clause::term(Field::NameKeywordSquashLocalized, squashed.as_str()));
    }
    if collapsed != name {
        query = query.should(Clause::term(Field::NameKeywordLocalized, collapsed.as_str()));
        if long_enough {
            query = query.should(Clause::term(Field::NameKeywordSquashLocalized, squash(&collapsed)));
        }
    }
    let query = query.minimum_should_match(1);

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());

    let input_ascii = name.is_ascii();
    let (kept, dropped): (Vec<CanonicalPerson>, Vec<CanonicalPerson>) = hits
        .hits
        .into_iter()
        .partition(|p| !input_ascii || !p.name_keyword.is_ascii() || !p.last_name.is_ascii());

    let dropped_ids: Vec<i64> = dropped.iter().map(|p| p.id).collect();
    logger.log_discarded(&dropped_ids, "plain ASCII on both sides");

    let accepted = ctx.candidates(kept, StrategyTag::Foreign);
    Ok(StrategyOutcome::accept(exclusions, accepted))
}

/// Step 3: first and middle name each match in full or by initial.
async fn short(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    if ctx.external.middle_name.is_empty() {
        logger.log_skipped("no middle name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let first = ctx.external.first_name.replace('.', "");
    let middle = ctx.external.middle_name.replace('.', "");
    let first_len = first.chars().count();
    let middle_len = middle.chars().count();

    // "J E Cortes" is already covered by the squash keys
    if first_len <= 1 && middle_len <= 1 {
        logger.log_skipped("first and middle name are initials");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let mut middle_clause = BoolQuery::new().should(Clause::phrase(Field::MiddleName, middle.as_str()));
    if middle_len > 1 {
        middle_clause = middle_clause.should(Clause::phrase(Field::MiddleName, first_char(&middle)));
    } else if middle_len == 1 {
        middle_clause = middle_clause.should(Clause::prefix(Field::MiddleName, middle.as_str()));
    }
    let middle_clause = middle_clause.minimum_should_match(1);

    let mut first_clause = BoolQuery::new()
        .should(Clause::phrase(Field::FirstName, first.as_str()))
        .should(Clause::phrase(Field::Aliases, first.as_str()));
    if first_len > 1 {
        first_clause = first_clause.should(Clause::phrase(Field::FirstName, first_char(&first)));
    }
    let first_clause = first_clause.minimum_should_match(1);

    let query = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .require(middle_clause)
        .require(first_clause);

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());

    match hits.total {
        0 => Ok(StrategyOutcome::nothing(exclusions)),
        1 => {
            let accepted = ctx.candidates(hits.hits, StrategyTag::Short);
            Ok(StrategyOutcome::accept(exclusions, accepted))
        }
        total => {
            // Too loose; retry on the initials alone and keep only a single hit
            let strict = ctx
                .base(&exclusions)?
                .with_last_name(&ctx.external.last_name)
                .filter(Clause::prefix(Field::FirstName, first_char(&first)))
                .filter(Clause::prefix(Field::MiddleName, first_char(&middle)));
            let strict_hits = ctx.execute(&strict, ctx.verification_size).await?;

            if strict_hits.total == 1 {
                let accepted = ctx.candidates(strict_hits.hits, StrategyTag::Short);
                Ok(StrategyOutcome::accept(exclusions, accepted))
            } else {
                logger.log_ambiguous("too many candidates", total);
                Ok(StrategyOutcome::nothing(exclusions))
            }
        }
    }
}

/// Step 4: no middle name on either side, first name reduced to its initial.
async fn no_middle_name(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    if !ctx.external.middle_name.is_empty() {
        logger.log_skipped("external record has a middle name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let first = &ctx.external.first_name;
    let initial = first_char(first);
    let first_clause = if first.chars().count() > 1 {
        Clause::phrase(Field::FirstName, initial.as_str())
    } else {
        Clause::prefix(Field::FirstName, initial.as_str())
    };

    let query = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .filter(Clause::term(Field::MiddleName, ""))
        .require(first_clause);

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());
    if hits.total == 0 {
        return Ok(StrategyOutcome::nothing(exclusions));
    }
    if hits.total > 1 {
        logger.log_ambiguous("too many candidates", hits.total);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    // Nobody else in the deployment may share the initial and last name
    let pattern = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .filter(Clause::prefix(Field::FirstName, initial.as_str()));
    let pattern_hits = ctx.execute(&pattern, ctx.verification_size).await?;
    if pattern_hits.total != 1 {
        logger.log_ambiguous("other people share the initials pattern", pattern_hits.total);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let candidates = ctx.candidates(hits.hits, StrategyTag::NoMiddleName);
    let accepted = ctx.conflict_filter(logger, &initial, candidates).await?;
    Ok(StrategyOutcome::accept(exclusions, accepted))
}

/// Step 5: external record without a middle name, candidate with one.
async fn one_middle_name(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    if !ctx.external.middle_name.is_empty() {
        logger.log_skipped("external record has a middle name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let first = &ctx.external.first_name;
    let query = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .exclude(Clause::term(Field::MiddleName, ""))
        .require(first_name_or_alias(first));

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());
    if hits.total == 0 {
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let signatures: BTreeSet<String> = hits
        .hits
        .iter()
        .map(|p| format!("{}{}", first_char(&p.first_name), p.middle_name))
        .collect();
    if signatures.len() > 1 {
        logger.log_ambiguous("conflicting middle-name signatures", signatures.len() as u64);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let loose = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .require(first_name_or_alias(first));
    let loose_hits = ctx.execute(&loose, ctx.verification_size).await?;
    if loose_hits.total != 1 {
        logger.log_ambiguous("first and last name are not unique", loose_hits.total);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let candidates = ctx.candidates(hits.hits, StrategyTag::OneMiddleName);
    let accepted = ctx.conflict_filter(logger, first, candidates).await?;
    Ok(StrategyOutcome::accept(exclusions, accepted))
}

/// Step 6: external record with a middle name, candidate without one.
async fn one_middle_name2(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    if ctx.external.middle_name.is_empty() {
        logger.log_skipped("no middle name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let first = &ctx.external.first_name;
    let query = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .filter(Clause::term(Field::MiddleName, ""))
        .require(first_name_or_alias(first));

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());
    if hits.total == 0 {
        return Ok(StrategyOutcome::nothing(exclusions));
    }
    if hits.total > 1 {
        logger.log_ambiguous("too many candidates", hits.total);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    // A same-named person who does carry a middle name makes the link unsafe
    let loose = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .exclude(Clause::term(Field::MiddleName, ""))
        .require(first_name_or_alias(first));
    let loose_hits = ctx.execute(&loose, ctx.verification_size).await?;
    if loose_hits.total != 0 {
        logger.log_ambiguous("same-named people with a middle name exist", loose_hits.total);
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let candidates = ctx.candidates(hits.hits, StrategyTag::OneMiddleName2);
    let accepted = ctx.conflict_filter(logger, first, candidates).await?;
    Ok(StrategyOutcome::accept(exclusions, accepted))
}

/// Uppercase letters of a name, in order: "Gert J" -> "GJ".
pub fn initials(name: &str) -> String {
    name.chars().filter(|c| c.is_uppercase()).collect()
}

/// Step 7: an external first name like "GJ" is the initials of the candidate's names.
async fn three_initials(
    ctx: &StrategyContext<'_>,
    logger: &MatchingLogger,
    exclusions: ExclusionSet,
) -> MatchResult<StrategyOutcome> {
    let first = &ctx.external.first_name;
    if !ctx.external.middle_name.is_empty() || first.chars().count() <= 1 {
        logger.log_skipped("needs a multi-letter first name and no middle name");
        return Ok(StrategyOutcome::nothing(exclusions));
    }

    let query = ctx
        .base(&exclusions)?
        .with_last_name(&ctx.external.last_name)
        .filter(Clause::prefix(Field::FirstName, first_char(first)));

    let hits = ctx.execute(&query, ctx.result_size).await?;
    logger.log_hits(hits.total, hits.hits.len());

    let matching: Vec<CanonicalPerson> = hits
        .hits
        .into_iter()
        .filter(|p| initials(&format!("{}{}", p.first_name, p.middle_name)) == *first)
        .collect();

    let accepted = ctx.candidates(matching, StrategyTag::ThreeInitials);
    Ok(StrategyOutcome::accept(exclusions, accepted))
}
