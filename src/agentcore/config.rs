//! Configuration surface for [`crate::agentcore::agent::Agent`] (spec §6).
//!
//! Mirrors the teacher's `CloudLLMConfig`: a plain struct users construct
//! directly, with a hand-written `Default` impl. No TOML/YAML/file-parsing
//! dependency is introduced — config loading is explicitly a collaborator
//! concern, not a core one (spec §1).

use crate::agentcore::middleware::Middleware;
use crate::agentcore::retry::RetryPolicy;
use crate::agentcore::tool::Tool;
use std::sync::Arc;
use std::time::Duration;

/// Default iteration cap (spec §6).
pub const DEFAULT_MAX_ITERATIONS: usize = 6;

/// All knobs an `Agent` can be constructed with. Every field has a sane
/// default via [`AgentConfig::default`]; callers typically start from
/// `AgentConfig::default()` and override only what they need, the same
/// way the teacher's consuming-builder methods layer onto `Agent::new`.
pub struct AgentConfig {
    /// Applied as the first system message of every request.
    pub system_prompt: String,
    /// Iteration cap; exceeding it fails the run with `MaxIterations`.
    pub max_iterations: usize,
    /// `0` defers to the provider's own default.
    pub max_output_tokens: usize,
    /// Input-token budget enforced by the context trimmer.
    pub max_input_tokens: usize,
    pub retry_policy: RetryPolicy,
    /// `None` disables per-tool timeouts.
    pub tool_timeout: Option<Duration>,
    pub parallel_tools: bool,
    pub max_parallel_tools: usize,
    /// Empty string means "lazily generate on first run" (I6).
    pub session_id: String,
    /// Prior messages prepended as context ahead of the run's own input.
    pub conversation_history: Vec<crate::agentcore::message::Message>,
    /// When set, a run's final content must parse as JSON or the run
    /// loops back with a corrective user turn (spec §4.1 step 8).
    pub response_schema: Option<serde_json::Value>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub observer: Option<Arc<dyn crate::agentcore::event::EventSink>>,
    pub store: Option<Arc<dyn crate::agentcore::store::Store>>,
    pub tools: Vec<Arc<dyn Tool>>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_max_parallel_tools(mut self, max_parallel: usize) -> Self {
        self.max_parallel_tools = max_parallel;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_conversation_history(mut self, history: Vec<crate::agentcore::message::Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn crate::agentcore::event::EventSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn crate::agentcore::store::Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_output_tokens: 0,
            max_input_tokens: crate::agentcore::context::DEFAULT_INPUT_TOKEN_BUDGET,
            retry_policy: RetryPolicy::default(),
            tool_timeout: None,
            parallel_tools: false,
            max_parallel_tools: crate::agentcore::dispatch::DEFAULT_MAX_PARALLEL_TOOLS,
            session_id: String::new(),
            conversation_history: Vec::new(),
            response_schema: None,
            middleware: Vec::new(),
            observer: None,
            store: None,
            tools: Vec::new(),
        }
    }
}
