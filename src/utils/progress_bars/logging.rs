// src/utils/progress_bars/logging.rs - Logging helpers for the strategy cascade and stream runs
use log::{debug, info, warn};
use std::time::Duration;

use crate::matching::cascade::CascadeMode;
use crate::models::core::StrategyTag;
use crate::models::stats_models::{MatchRunStats, WriterStats};

fn strategy_label(tag: StrategyTag) -> (&'static str, &'static str) {
    match tag {
        StrategyTag::Simple => ("SIMPLE", "🎯"),
        StrategyTag::Foreign => ("FOREIGN", "🌍"),
        StrategyTag::Short => ("SHORT", "✂️"),
        StrategyTag::NoMiddleName => ("NOMID", "🔤"),
        StrategyTag::OneMiddleName => ("ONEMID1", "👤"),
        StrategyTag::OneMiddleName2 => ("ONEMID2", "👥"),
        StrategyTag::ThreeInitials => ("INITIALS", "🔠"),
    }
}

/// Tagged log lines for one strategy run against one external record.
#[derive(Clone)]
pub struct MatchingLogger {
    strategy_name: &'static str,
    strategy_emoji: &'static str,
    subject: String,
    deployment_id: i32,
}

impl MatchingLogger {
    pub fn new(tag: StrategyTag, subject: &str, deployment_id: i32) -> Self {
        let (strategy_name, strategy_emoji) = strategy_label(tag);
        Self {
            strategy_name,
            strategy_emoji,
            subject: subject.to_string(),
            deployment_id,
        }
    }

    pub fn log_start(&self, excluded: usize) {
        debug!(
            "[{}] {} Searching '{}' in deployment {} ({} ids excluded)",
            self.strategy_name, self.strategy_emoji, self.subject, self.deployment_id, excluded
        );
    }

    pub fn log_skipped(&self, reason: &str) {
        debug!(
            "[{}] {} ⏭️  Skipped '{}': {}",
            self.strategy_name, self.strategy_emoji, self.subject, reason
        );
    }

    pub fn log_hits(&self, total: u64, returned: usize) {
        debug!(
            "[{}] {} 📊 '{}' (did:{}): {} total hits, {} returned",
            self.strategy_name, self.strategy_emoji, self.subject, self.deployment_id, total, returned
        );
    }

    pub fn log_accepted(&self, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        info!(
            "[{}] {} ✅ '{}' (did:{}) ====> {:?}",
            self.strategy_name, self.strategy_emoji, self.subject, self.deployment_id, ids
        );
    }

    /// "No confident match" outcomes: logged for operator review, never raised.
    pub fn log_ambiguous(&self, reason: &str, count: u64) {
        info!(
            "[{}] {} 🤷 '{}' (did:{}): {} ({})",
            self.strategy_name, self.strategy_emoji, self.subject, self.deployment_id, reason, count
        );
    }

    pub fn log_conflict_veto(&self, internal_id: i64, first_name: &str, others: i64) {
        warn!(
            "[{}] {} 🚫 '{}' (did:{}) -> {} vetoed: {} other OneKey record(s) named '{}'",
            self.strategy_name,
            self.strategy_emoji,
            self.subject,
            self.deployment_id,
            internal_id,
            others,
            first_name
        );
    }

    pub fn log_discarded(&self, ids: &[i64], reason: &str) {
        if ids.is_empty() {
            return;
        }
        debug!(
            "[{}] {} 🗑️  '{}' discarded {:?}: {}",
            self.strategy_name, self.strategy_emoji, self.subject, ids, reason
        );
    }
}

pub fn log_run_start(run_id: &str, deployments: &[i32], mode: CascadeMode, dry_run: bool) {
    info!("🚀 ===== ONEKEY MATCHING RUN STARTING =====");
    info!("📅 Run ID: {}", run_id);
    info!("   • Deployments: {:?}", deployments);
    info!("   • Cascade mode: {}", mode);
    if dry_run {
        info!("   • Dry run: linkages are logged, not written");
    }
    info!("🎯 Strategies: simple, foreign, short, nomid, onemid1, onemid2, initials");
    info!("================================================");
}

pub fn log_record_progress(records_seen: usize, candidates: usize, elapsed: Duration) {
    if records_seen > 0 && records_seen % 5000 == 0 {
        let rate = records_seen as f64 / elapsed.as_secs_f64().max(0.001);
        info!(
            "📊 Progress: {} OneKey records processed, {} candidates accepted ({:.0} records/s)",
            records_seen, candidates, rate
        );
    }
}

pub fn log_run_completion(stats: &MatchRunStats, writer: &WriterStats, duration: Duration) {
    info!("🎉 ===== ONEKEY MATCHING RUN COMPLETED =====");
    info!("📅 Run ID: {}", stats.run_id);
    info!("⏱️  Total Duration: {:.2?}", duration);
    info!(
        "📈 Records: {} seen, {} skipped, {} resolutions, {} errors",
        stats.records_seen, stats.records_skipped, stats.resolutions, stats.resolution_errors
    );
    info!("🎯 Candidates accepted: {}", stats.candidates_accepted);
    for (tag, count) in &stats.strategy_counts {
        let (name, emoji) = strategy_label(*tag);
        info!("   {} {:<9} {}", emoji, name, count);
    }
    info!(
        "💾 Linkages: {} submitted, {} written, {} failed",
        writer.submitted, writer.written, writer.failed
    );
    if writer.failed > 0 {
        warn!("⚠️  {} linkage writes failed and were not retried", writer.failed);
    }
    info!("================================================");
}
