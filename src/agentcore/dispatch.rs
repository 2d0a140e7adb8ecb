//! Bounded-parallel tool dispatch (spec §4.2, §5).
//!
//! Grounded on the corpus's `join_all` + counting-semaphore idiom for
//! worker-pool fan-out (e.g. `dirmacs-ares/src/llm/pool.rs`), but fan-in
//! must preserve the caller's input order regardless of completion order
//! (spec P5) — matched here by pre-sizing a `Vec<Option<_>>` by index and
//! writing each worker's outcome into its own slot, then collecting in
//! order, rather than relying on `join_all`'s own ordering guarantees.

use crate::agentcore::event::{Event, EventType, ToolEvent};
use crate::agentcore::message::{Message, ToolCall};
use crate::agentcore::middleware::{MiddlewareError, MiddlewarePipeline};
use crate::agentcore::tool::Tool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default bound on concurrent tool executions when parallel dispatch is
/// enabled and the caller hasn't overridden it (spec §6).
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 10;

/// Immutable snapshot of the tools available to one dispatch batch, taken
/// under the registry's read lock and then used without holding it (spec
/// §5 shared-resource policy).
pub type ToolSnapshot = HashMap<String, Arc<dyn Tool>>;

/// Configuration the agent loop passes into one dispatch call.
#[derive(Clone, Copy)]
pub struct DispatchOptions {
    pub parallel: bool,
    pub max_parallel: usize,
    pub tool_timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallel: DEFAULT_MAX_PARALLEL_TOOLS,
            tool_timeout: None,
        }
    }
}

/// Everything produced by dispatching one batch of tool calls: the
/// resulting tool messages (in input order) and the events emitted along
/// the way (before/after pairs, in input order, per spec §5).
pub struct DispatchOutcome {
    pub messages: Vec<Message>,
    pub events: Vec<Event>,
}

/// Executes one assistant message's tool calls, sequentially or with
/// bounded concurrency, and converts every outcome to a tool [`Message`].
///
/// A middleware error aborts the whole batch (returns `Err`); tool-level
/// errors are local and never abort it (spec §4.2 "batch failure").
pub async fn dispatch_batch(
    snapshot: &ToolSnapshot,
    calls: &[ToolCall],
    middleware: &MiddlewarePipeline,
    options: DispatchOptions,
    run_id: &str,
    session_id: &str,
    provider: &str,
    iteration: usize,
) -> Result<DispatchOutcome, MiddlewareError> {
    if calls.is_empty() {
        return Ok(DispatchOutcome {
            messages: Vec::new(),
            events: Vec::new(),
        });
    }

    let use_parallel = options.parallel && calls.len() > 1;
    let cap = options.max_parallel.max(1).min(calls.len());

    if use_parallel {
        dispatch_parallel(
            snapshot, calls, middleware, options, cap, run_id, session_id, provider, iteration,
        )
        .await
    } else {
        dispatch_sequential(
            snapshot, calls, middleware, options, run_id, session_id, provider, iteration,
        )
        .await
    }
}

async fn dispatch_sequential(
    snapshot: &ToolSnapshot,
    calls: &[ToolCall],
    middleware: &MiddlewarePipeline,
    options: DispatchOptions,
    run_id: &str,
    session_id: &str,
    provider: &str,
    iteration: usize,
) -> Result<DispatchOutcome, MiddlewareError> {
    let mut messages = Vec::with_capacity(calls.len());
    let mut events = Vec::with_capacity(calls.len() * 2);

    for call in calls {
        let (message, call_events) = dispatch_one(
            snapshot,
            call.clone(),
            middleware,
            options.tool_timeout,
            run_id,
            session_id,
            provider,
            iteration,
        )
        .await?;
        messages.push(message);
        events.extend(call_events);
    }

    Ok(DispatchOutcome { messages, events })
}

async fn dispatch_parallel(
    snapshot: &ToolSnapshot,
    calls: &[ToolCall],
    middleware: &MiddlewarePipeline,
    options: DispatchOptions,
    cap: usize,
    run_id: &str,
    session_id: &str,
    provider: &str,
    iteration: usize,
) -> Result<DispatchOutcome, MiddlewareError> {
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut slots: Vec<Option<(Message, Vec<Event>)>> = vec![None; calls.len()];

    let mut handles = Vec::with_capacity(calls.len());
    for (idx, call) in calls.iter().cloned().enumerate() {
        let semaphore = semaphore.clone();
        let snapshot = snapshot.clone();
        let run_id = run_id.to_string();
        let session_id = session_id.to_string();
        let provider = provider.to_string();
        let timeout = options.tool_timeout;
        // Middleware and tools are trait objects behind `Arc`, but the
        // pipeline reference can't cross a spawned task's lifetime, so
        // parallel dispatch runs each worker on the current task set
        // bounded by the semaphore rather than `tokio::spawn`, keeping the
        // borrow of `middleware` valid for the whole batch. The permit is
        // acquired *inside* the future so construction never blocks — only
        // polling it (via `join_all`) contends for the semaphore.
        handles.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = dispatch_one(
                &snapshot, call, middleware, timeout, &run_id, &session_id, &provider, iteration,
            )
            .await;
            (idx, result)
        });
    }

    let outcomes = futures_util::future::join_all(handles).await;
    for (idx, outcome) in outcomes {
        let (message, events) = outcome?;
        slots[idx] = Some((message, events));
    }

    let mut messages = Vec::with_capacity(calls.len());
    let mut events = Vec::with_capacity(calls.len() * 2);
    for slot in slots {
        let (message, call_events) = slot.expect("every slot filled by its worker");
        messages.push(message);
        events.extend(call_events);
    }

    Ok(DispatchOutcome { messages, events })
}

async fn dispatch_one(
    snapshot: &ToolSnapshot,
    mut call: ToolCall,
    middleware: &MiddlewarePipeline,
    timeout: Option<Duration>,
    run_id: &str,
    session_id: &str,
    provider: &str,
    iteration: usize,
) -> Result<(Message, Vec<Event>), MiddlewareError> {
    let mut events = Vec::with_capacity(2);

    {
        let mut before_event = ToolEvent {
            call: &mut call,
            result: None,
            tool_error: None,
        };
        middleware.run_before_tool(&mut before_event).await?;
    }
    events.push(
        Event::new(EventType::BeforeTool, run_id, session_id, provider)
            .with_iteration(iteration)
            .with_tool(call.name.clone(), call.id.clone()),
    );

    if call.arguments.is_null() {
        call.arguments = serde_json::json!({});
    }

    let (payload, tool_error): (serde_json::Value, Option<String>) =
        match snapshot.get(&call.name) {
            None => (
                serde_json::json!({ "error": format!("tool {} not found", call.name) }),
                Some(format!("tool {} not found", call.name)),
            ),
            Some(tool) => {
                let execution = tool.execute(call.arguments.clone());
                let outcome = match timeout {
                    Some(duration) => match tokio::time::timeout(duration, execution).await {
                        Ok(inner) => inner,
                        Err(_) => Err(Box::<dyn std::error::Error + Send + Sync>::from(
                            "tool call deadline exceeded",
                        )),
                    },
                    None => execution.await,
                };
                match outcome {
                    Ok(value) => (value, None),
                    Err(err) => (
                        serde_json::json!({ "error": err.to_string() }),
                        Some(err.to_string()),
                    ),
                }
            }
        };

    let serialized = serde_json::to_string(&payload).unwrap_or_else(|err| {
        serde_json::json!({
            "error": "failed to encode tool output",
            "detail": err.to_string(),
        })
        .to_string()
    });

    let mut result_message = Message::tool_result(call.name.clone(), call.id.clone(), serialized);

    {
        let mut after_event = ToolEvent {
            call: &mut call,
            result: Some(&mut result_message),
            tool_error: tool_error.as_deref(),
        };
        middleware.run_after_tool(&mut after_event).await?;
    }

    let mut after = Event::new(EventType::AfterTool, run_id, session_id, provider)
        .with_iteration(iteration)
        .with_tool(call.name.clone(), call.id.clone())
        .with_message(result_message.clone());
    if let Some(err) = &tool_error {
        after = after.with_error(err.clone());
    }
    events.push(after);

    Ok((result_message, events))
}
