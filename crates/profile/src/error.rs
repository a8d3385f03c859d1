use thiserror::Error;

/// Errors raised by operations over profiles.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    /// Two profiles which are expected to have the same shape do not.
    #[error("inconsistent profiles: {0}")]
    Inconsistent(String),
}
