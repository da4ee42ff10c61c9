// src/error.rs
use thiserror::Error;

/// Errors surfaced by a single resolution call.
///
/// Ambiguity ("too many candidates", conflicting middle names) is not an
/// error; strategies report it as "no match" and log it.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("country code {0} is not defined")]
    UnknownCountry(String),

    #[error("required field {0} is missing or empty")]
    MissingField(&'static str),

    #[error("deployment id {0:?} is not a number")]
    InvalidDeployment(String),

    #[error("expected exactly one live person {id} in deployment {deployment_id}, found {hits}")]
    PersonNotFound { id: i64, deployment_id: i32, hits: u64 },

    /// Search backend, reference store or relational failures.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type MatchResult<T> = std::result::Result<T, MatchError>;
