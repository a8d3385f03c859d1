use mrwhatif_profile::{CounterKind, ProfileError};
use thiserror::Error;

/// Errors of the what-if engine.
///
/// Prediction is deterministic, so none of these errors is transient.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WhatIfError {
    /// Baseline profile has no metrics to derive from.
    #[error("baseline profile {0} is empty")]
    EmptyProfile(String),

    /// Baseline profile lacks a counter which has no default.
    #[error("baseline profile {profile} has no counter {counter:?}")]
    MissingCounter { profile: String, counter: CounterKind },

    /// Configuration value can not be parsed.
    #[error("invalid value '{value}' for configuration key {key}")]
    InvalidConfig { key: String, value: String },

    /// Input or shuffle specification is malformed.
    #[error("invalid specification: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("can't read configuration: {0}")]
    Parse(String),
}
