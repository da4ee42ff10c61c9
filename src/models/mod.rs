// src/models/mod.rs
pub mod core;
pub mod stats_models;

pub use self::core::{
    CanonicalPerson, ExclusionSet, ExternalRecord, Linkage, MatchCandidate, MatchFlags, StrategyTag,
};
pub use stats_models::{MatchRunStats, WriterStats};
