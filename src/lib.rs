// src/lib.rs

//! Deterministic iterate-generate-tool loop core for LLM agent runtimes.
//!
//! `agentcore` owns the agent iteration state machine, the provider-call
//! retry path, context-window trimming, bounded-parallel tool dispatch,
//! a middleware pipeline, and a durable run-record projection. Concrete
//! providers, tools, and persistence backends are collaborators this
//! crate consumes through traits — see [`agentcore::provider::Provider`],
//! [`agentcore::tool::Tool`], and [`agentcore::store::Store`].

pub mod agentcore;

// Re-export the pieces most callers reach for first, the way the teacher
// re-exports `ClientWrapper`/`LLMSession` at the crate root.
pub use agentcore::{Agent, AgentConfig, AgentError, RunResult};
