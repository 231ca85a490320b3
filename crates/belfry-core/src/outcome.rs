//! Results of a single handler invocation.

use std::fmt;
use std::time::Duration;

/// What a handler reports back when it finishes normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// The invocation counts against the rule's rate limits.
    #[default]
    Handled,
    /// The invocation gives back the rate-limit budget it consumed.
    Unthrottled,
}

/// Final bookkeeping record of one invocation, as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The handler returned normally.
    Completed(Outcome),
    /// The handler returned an error or panicked.
    Failed(String),
    /// The handler exceeded its time budget and was abandoned.
    TimedOut(Duration),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_unthrottled(&self) -> bool {
        matches!(self, Self::Completed(Outcome::Unthrottled))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(Outcome::Handled) => f.write_str("completed"),
            Self::Completed(Outcome::Unthrottled) => f.write_str("completed (unthrottled)"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut(budget) => write!(f, "timed out after {budget:?}"),
        }
    }
}

/// Why a matched rule was not submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suppression {
    /// A rate-limit window for the rule is exhausted.
    RateLimited,
    /// The rule is exclusive and an invocation is already in flight.
    Exclusive,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate limited"),
            Self::Exclusive => f.write_str("exclusive invocation in flight"),
        }
    }
}
