// src/utils/config.rs - Matching run configuration from the environment
use log::{info, warn};
use std::env;
use std::str::FromStr;

use crate::error::{MatchError, MatchResult};
use crate::matching::cascade::CascadeMode;

/// Every deployment the KOL roster is published to.
pub const DEFAULT_DEPLOYMENTS: &str = "1,2,3,9,10,11,12,13,14,15,16,17,22,24,25,26,27,28,29,30,31,32";

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub es_url: String,
    pub es_index: String,
    /// Page size of the strategy queries.
    pub search_result_size: usize,
    /// Page size of the re-verification queries.
    pub verification_result_size: usize,
    pub deployments: Vec<i32>,
    pub cascade_mode: CascadeMode,
    pub linkage_writers: usize,
    pub linkage_queue_capacity: usize,
    pub record_batch_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            es_url: "http://localhost:9202".to_string(),
            es_index: "experts".to_string(),
            search_result_size: 10,
            verification_result_size: 100,
            deployments: default_deployments(),
            cascade_mode: CascadeMode::default(),
            linkage_writers: num_cpus::get().clamp(1, 8),
            linkage_queue_capacity: 256,
            record_batch_size: 3000,
        }
    }
}

impl MatchingConfig {
    pub fn from_env() -> MatchResult<Self> {
        let defaults = Self::default();

        let deployments = match env::var("MATCH_DEPLOYMENTS") {
            Ok(raw) => parse_deployments(&raw)?,
            Err(_) => defaults.deployments,
        };

        let cascade_mode = match env::var("CASCADE_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Unknown CASCADE_MODE '{}', falling back to {}", raw, defaults.cascade_mode);
                defaults.cascade_mode
            }),
            Err(_) => defaults.cascade_mode,
        };

        Ok(Self {
            es_url: env::var("ES_URL").unwrap_or(defaults.es_url),
            es_index: env::var("ES_INDEX").unwrap_or(defaults.es_index),
            search_result_size: env_or("SEARCH_RESULT_SIZE", defaults.search_result_size),
            verification_result_size: env_or("VERIFICATION_RESULT_SIZE", defaults.verification_result_size),
            deployments,
            cascade_mode,
            linkage_writers: env_or("LINKAGE_WRITERS", defaults.linkage_writers).max(1),
            linkage_queue_capacity: env_or("LINKAGE_QUEUE_CAPACITY", defaults.linkage_queue_capacity).max(1),
            record_batch_size: env_or("RECORD_BATCH_SIZE", defaults.record_batch_size).max(1),
        })
    }

    pub fn log_config(&self) {
        info!("Matching configuration:");
        info!("   • Search backend: {} (index: {})", self.es_url, self.es_index);
        info!("   • Deployments: {:?}", self.deployments);
        info!("   • Cascade mode: {}", self.cascade_mode);
        info!(
            "   • Result sizes: {} per strategy, {} per verification",
            self.search_result_size, self.verification_result_size
        );
        info!(
            "   • Linkage writers: {} (queue capacity {})",
            self.linkage_writers, self.linkage_queue_capacity
        );
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn default_deployments() -> Vec<i32> {
    DEFAULT_DEPLOYMENTS
        .split(',')
        .filter_map(|d| d.parse().ok())
        .collect()
}

/// Parses "1,2,3" into deployment ids. Rejects empty lists and non-numeric entries.
pub fn parse_deployments(raw: &str) -> MatchResult<Vec<i32>> {
    let mut deployments = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let did: i32 = part
            .parse()
            .map_err(|_| MatchError::InvalidDeployment(part.to_string()))?;
        if !deployments.contains(&did) {
            deployments.push(did);
        }
    }

    if deployments.is_empty() {
        return Err(MatchError::InvalidDeployment(raw.to_string()));
    }
    Ok(deployments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deployments() {
        assert_eq!(parse_deployments("1,2, 9").unwrap(), vec![1, 2, 9]);
        assert_eq!(parse_deployments("3,3,1").unwrap(), vec![3, 1]);
        assert!(matches!(
            parse_deployments("1,x"),
            Err(MatchError::InvalidDeployment(ref d)) if d == "x"
        ));
        assert!(parse_deployments("").is_err());
        assert!(parse_deployments(" , ").is_err());
    }

    #[test]
    fn test_default_deployments() {
        let config = MatchingConfig::default();
        assert_eq!(config.deployments.len(), 22);
        assert_eq!(config.deployments.first(), Some(&1));
        assert_eq!(config.deployments.last(), Some(&32));
        assert!(config.linkage_writers >= 1 && config.linkage_writers <= 8);
        assert_eq!(config.cascade_mode, CascadeMode::CollectAll);
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("MATCH_DEPLOYMENTS", "9,10");
        env::set_var("CASCADE_MODE", "first-match");
        env::set_var("SEARCH_RESULT_SIZE", "25");
        env::set_var("LINKAGE_WRITERS", "0");

        let config = MatchingConfig::from_env().unwrap();
        assert_eq!(config.deployments, vec![9, 10]);
        assert_eq!(config.cascade_mode, CascadeMode::FirstMatch);
        assert_eq!(config.search_result_size, 25);
        assert_eq!(config.linkage_writers, 1);

        env::set_var("MATCH_DEPLOYMENTS", "nine");
        assert!(MatchingConfig::from_env().is_err());

        env::remove_var("MATCH_DEPLOYMENTS");
        env::remove_var("CASCADE_MODE");
        env::remove_var("SEARCH_RESULT_SIZE");
        env::remove_var("LINKAGE_WRITERS");
    }
}
