//! Error types shared by the Belfry crates.

use thiserror::Error;

/// Errors raised synchronously when registering rules or jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A rule or job with this name is already registered.
    #[error("'{0}' is already registered")]
    DuplicateName(String),

    /// A job was registered with a zero interval.
    #[error("job '{0}' has a zero interval")]
    ZeroInterval(String),

    /// A match pattern failed to compile.
    #[error("invalid pattern for '{name}': {reason}")]
    InvalidPattern {
        /// Name of the rule carrying the pattern.
        name: String,
        /// Compiler message.
        reason: String,
    },
}

impl RegistryError {
    pub fn invalid_pattern(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for registration operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while extracting handler parameters from an
/// invocation context.
///
/// An extraction failure aborts the invocation before the handler body runs
/// and is recorded as a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The extractor needs a trigger but the invocation came from a job.
    #[error("'{0}' was invoked by the scheduler and has no trigger")]
    NoTrigger(String),

    /// The extractor needs a job tick but the invocation came from a rule.
    #[error("'{0}' was invoked by a trigger and has no job tick")]
    NoJobTick(String),

    /// The plugin configuration section could not be deserialised.
    #[error("invalid plugin configuration for '{name}': {reason}")]
    InvalidConfig {
        /// Name of the rule or job being invoked.
        name: String,
        /// Deserialiser message.
        reason: String,
    },

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;
