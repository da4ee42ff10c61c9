// src/models/stats_models.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::core::StrategyTag;

/// Counters for one stream matching run; persisted into `matching_run` at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRunStats {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,
    pub description: Option<String>,
    pub deployments: Vec<i32>,
    pub records_seen: usize,
    pub records_skipped: usize,
    pub resolutions: usize,
    pub resolution_errors: usize,
    pub candidates_accepted: usize,
    pub strategy_counts: BTreeMap<StrategyTag, usize>,
    pub linkages_written: usize,
    pub linkages_failed: usize,
    pub matching_time: f64,
}

impl MatchRunStats {
    pub fn new(run_id: &str, run_timestamp: NaiveDateTime, description: Option<&str>, deployments: &[i32]) -> Self {
        Self {
            run_id: run_id.to_string(),
            run_timestamp,
            description: description.map(|s| s.to_string()),
            deployments: deployments.to_vec(),
            records_seen: 0,
            records_skipped: 0,
            resolutions: 0,
            resolution_errors: 0,
            candidates_accepted: 0,
            strategy_counts: BTreeMap::new(),
            linkages_written: 0,
            linkages_failed: 0,
            matching_time: 0.0,
        }
    }

    pub fn record_strategy(&mut self, tag: StrategyTag) {
        *self.strategy_counts.entry(tag).or_insert(0) += 1;
        self.candidates_accepted += 1;
    }
}

/// Outcome of the linkage writer pool after shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub submitted: usize,
    pub written: usize,
    pub failed: usize,
}
