//! Error kinds for the agent loop (spec §7).
//!
//! Follows the teacher's `OrchestrationError` idiom: a plain enum with a
//! hand-written `Display`/`Error` impl rather than a `thiserror` derive —
//! the teacher's workspace never depends on `thiserror`, so this keeps the
//! error-handling stack aligned with it.

use std::fmt;

/// Every fatal-to-the-run error kind named in spec §7.
///
/// `Cancellation` and the tool-local failures (tool-not-found, tool
/// execution errors) are deliberately absent here: per the propagation
/// policy, those are *not* run-fatal — they become tool messages or a
/// short-circuiting `Ok`/context-error return, never an `AgentError`
/// variant on their own (see [`crate::agentcore::dispatch`]).
#[derive(Debug)]
pub enum AgentError {
    /// Empty input passed to `Agent::run`/`run_detailed`.
    InvalidInput(String),
    /// Generation failed after the configured retry budget was exhausted.
    ProviderFailure(String),
    /// Rate-limit retries were exhausted.
    RateLimitExhausted(String),
    /// A before/after generate hook returned an error. `stage` names
    /// which of the two hooks failed ("before-generate" or
    /// "after-generate") so the rendered message names the right one
    /// per spec §7 ("the caller sees an error that names the stage").
    MiddlewareFailure { stage: &'static str, message: String },
    /// A before/after tool hook returned an error.
    ToolMiddlewareFailure(String),
    /// The provider kept returning empty assistant content after the two
    /// empty-response recovery retries.
    EmptyAssistantResponse,
    /// The iteration cap (`max_iterations`) was exceeded.
    MaxIterations(usize),
    /// The ambient cancellation signal fired during a suspension point.
    Cancelled,
    /// A fatal error occurred and the attempt to persist the resulting
    /// failed [`crate::agentcore::store::RunRecord`] *also* failed. Neither
    /// error is discarded.
    Persist {
        source: Box<AgentError>,
        store_error: String,
    },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            AgentError::ProviderFailure(msg) => write!(f, "generation failed: {}", msg),
            AgentError::RateLimitExhausted(msg) => {
                write!(f, "rate limit retries exhausted: {}", msg)
            }
            AgentError::MiddlewareFailure { stage, message } => {
                write!(f, "middleware {} failed: {}", stage, message)
            }
            AgentError::ToolMiddlewareFailure(msg) => {
                write!(f, "tool execution failed: {}", msg)
            }
            AgentError::EmptyAssistantResponse => write!(
                f,
                "provider returned empty assistant content after retries"
            ),
            AgentError::MaxIterations(n) => write!(f, "max iterations reached ({})", n),
            AgentError::Cancelled => write!(f, "run cancelled"),
            AgentError::Persist {
                source,
                store_error,
            } => write!(
                f,
                "{} (additionally, failed to persist failure record: {})",
                source, store_error
            ),
        }
    }
}

impl std::error::Error for AgentError {}

impl AgentError {
    /// Wrap `self` as the primary error of a failed persistence attempt,
    /// preserving both the original error and the store's complaint (the
    /// failure-persistence contract in spec §4.1).
    pub fn with_persist_failure(self, store_error: impl Into<String>) -> Self {
        AgentError::Persist {
            source: Box::new(self),
            store_error: store_error.into(),
        }
    }
}
