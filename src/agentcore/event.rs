//! Structured observation events (spec §3, §5 ordering guarantees).
//!
//! The teacher's `event` module is a callback-based observability layer
//! with two large enums (`AgentEvent`, `OrchestrationEvent`) tailored to
//! multi-agent orchestration. This module keeps the same
//! `EventHandler`-style "trait with a default no-op method, `Arc<dyn _>`
//! shared across tasks" idiom but collapses the event shape down to the
//! single structured [`Event`] record the core's data model calls for,
//! since there is exactly one kind of run here, not a roster of
//! orchestration modes.

use crate::agentcore::message::{Message, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    RunStarted,
    BeforeGenerate,
    AfterGenerate,
    BeforeTool,
    AfterTool,
    RunCompleted,
    RunFailed,
}

/// One structured observation emitted during a run.
///
/// Emitted in the sequence fixed by §5: `runStarted`, then per turn
/// `beforeGenerate`, `afterGenerate`, then `(beforeTool, afterTool)*` in
/// call order for any dispatched batch, and finally `runCompleted` or
/// `runFailed` as the very last event of the run.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub run_id: String,
    pub session_id: String,
    pub provider: String,
    pub iteration: Option<usize>,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub message: Option<Message>,
    pub error: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, run_id: impl Into<String>, session_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: chrono::Utc::now(),
            run_id: run_id.into(),
            session_id: session_id.into(),
            provider: provider.into(),
            iteration: None,
            tool_name: None,
            tool_call_id: None,
            message: None,
            error: None,
        }
    }

    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Live mutable view of a generation call, passed to
/// [`crate::agentcore::middleware::Middleware::before_generate`] and
/// [`crate::agentcore::middleware::Middleware::after_generate`].
pub struct GenerateEvent<'a> {
    pub request: &'a mut crate::agentcore::message::Request,
    pub response: Option<&'a mut crate::agentcore::message::Response>,
    pub iteration: usize,
}

/// Live mutable view of one tool call, passed to
/// [`crate::agentcore::middleware::Middleware::before_tool`] and
/// [`crate::agentcore::middleware::Middleware::after_tool`].
pub struct ToolEvent<'a> {
    pub call: &'a mut crate::agentcore::message::ToolCall,
    pub result: Option<&'a mut Message>,
    pub tool_error: Option<&'a str>,
}

/// Sink that accepts structured [`Event`]s (spec §6, "event sink
/// contract"). Errors from the sink are swallowed by the core, mirroring
/// the teacher's `EventHandler` default-no-op pattern: implementors only
/// override what they need, and a broken sink never takes down a run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// No-op sink used when no observer is configured.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

pub(crate) async fn emit_swallowing_errors(sink: &dyn EventSink, event: Event) {
    if let Err(e) = sink.emit(event).await {
        log::warn!("event sink returned an error, ignoring: {}", e);
    }
}

/// Accumulates cross-turn usage, exposed to callers that want
/// monotonicity without recomputing it themselves (invariant I5).
#[derive(Debug, Default, Clone, Copy)]
pub struct UsageAccumulator(pub Usage);

impl UsageAccumulator {
    pub fn add(&mut self, usage: Option<Usage>) {
        if let Some(u) = usage {
            self.0.accumulate(&u);
        }
    }
}
