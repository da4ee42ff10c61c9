// src/lib.rs
pub mod error;
pub mod matching;
pub mod models;
pub mod search;
pub mod utils;

// Re-export common types for easier access
pub use error::MatchError;
pub use matching::canonical::{canonicalize, merge_aliases, CanonicalFields};
pub use matching::cascade::{CascadeMode, Resolver};
pub use models::core::{
    CanonicalPerson, ExclusionSet, ExternalRecord, Linkage, MatchCandidate, MatchFlags, StrategyTag,
};
pub use search::SearchBackend;
pub use utils::db_connect::PgPool;
