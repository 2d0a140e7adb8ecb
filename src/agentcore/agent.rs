//! The agent orchestrator: run lifecycle, turn loop, termination (spec §4.1).
//!
//! Grounded on the teacher's `Agent` (consuming builder, `Arc<RwLock<_>>`
//! tool registry, `emit()` helper around an optional event sink) but the
//! generation loop itself — trim, before-generate, call-with-retry,
//! after-generate, terminal-or-dispatch — has no equivalent in the
//! teacher's single-shot `send()`/`generate_with_tokens()` methods; that
//! part is built directly from spec §4.1's numbered turn procedure and
//! state machine, using the teacher's `emit`/builder idioms as the shell
//! around it.

use crate::agentcore::cancel::Cancellation;
use crate::agentcore::config::AgentConfig;
use crate::agentcore::context::trim_history;
use crate::agentcore::dispatch::{self, DispatchOptions, ToolSnapshot};
use crate::agentcore::error::AgentError;
use crate::agentcore::event::{emit_swallowing_errors, Event, EventSink, EventType, GenerateEvent, NullSink};
use crate::agentcore::message::{Message, Request, Role, Usage};
use crate::agentcore::middleware::MiddlewarePipeline;
use crate::agentcore::provider::{Provider, ProviderError};
use crate::agentcore::retry::RetryPolicy;
use crate::agentcore::store::{NullStore, RunRecord, RunRecorder, Store};
use crate::agentcore::tool::{SharedToolRegistry, Tool};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maximum number of extra attempts the empty-response recovery in §4.1
/// step 7 makes before declaring the run failed.
const EMPTY_RESPONSE_MAX_RETRIES: usize = 2;
const EMPTY_RESPONSE_BACKOFF_STEP: Duration = Duration::from_millis(500);

const SCHEMA_VIOLATION_PROMPT: &str =
    "Your response was not valid JSON. Please respond again with content that is valid JSON matching the required schema.";

/// Everything a caller of [`Agent::run_detailed`] gets back on success.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub output: String,
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub iterations: usize,
    pub provider: String,
    pub run_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub events: Vec<Event>,
}

/// The deterministic iterate-generate-tool loop orchestrator (spec §2,
/// §4.1). One `Agent` instance may drive many runs; `session_id` is
/// assigned lazily on the first run and then stable for the instance's
/// lifetime (I6).
pub struct Agent {
    provider: Arc<dyn Provider>,
    config: AgentConfig,
    tool_registry: SharedToolRegistry,
    middleware: MiddlewarePipeline,
    retry_policy: RetryPolicy,
    store: Arc<dyn Store>,
    observer: Arc<dyn EventSink>,
    session_id: Mutex<Option<String>>,
}

impl Agent {
    /// Construct an agent from a provider and a fully-built [`AgentConfig`].
    pub fn new(provider: Arc<dyn Provider>, mut config: AgentConfig) -> Self {
        let mut registry = crate::agentcore::tool::ToolRegistry::new();
        for tool in config.tools.drain(..) {
            registry.register(tool);
        }
        let mut middleware = MiddlewarePipeline::new();
        for mw in config.middleware.drain(..) {
            middleware.register(mw);
        }
        let store = config
            .store
            .take()
            .unwrap_or_else(|| Arc::new(NullStore));
        let observer = config
            .observer
            .take()
            .unwrap_or_else(|| Arc::new(NullSink));
        let retry_policy = config.retry_policy.clone();
        let initial_session = if config.session_id.is_empty() {
            None
        } else {
            Some(config.session_id.clone())
        };

        Self {
            provider,
            config,
            tool_registry: Arc::new(tokio::sync::RwLock::new(registry)),
            middleware,
            retry_policy,
            store,
            observer,
            session_id: Mutex::new(initial_session),
        }
    }

    /// Resolve the session id for this instance, lazily generating a fresh
    /// one on the first call and keeping it stable thereafter (I6).
    fn session_id(&self) -> String {
        let mut guard = self.session_id.lock().expect("session_id mutex poisoned");
        if let Some(id) = guard.as_ref() {
            return id.clone();
        }
        let fresh = uuid::Uuid::new_v4().to_string();
        *guard = Some(fresh.clone());
        fresh
    }

    pub async fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.tool_registry.write().await.register(tool);
    }

    pub async fn unregister_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tool_registry.write().await.unregister(name)
    }

    pub async fn list_tools(&self) -> Vec<String> {
        self.tool_registry
            .read()
            .await
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    /// Simple entrypoint: returns just the final assistant content.
    pub async fn run(&self, input: &str) -> Result<String, AgentError> {
        self.run_with_cancellation(input, Cancellation::never())
            .await
            .map(|r| r.output)
    }

    /// Full entrypoint: returns the transcript, usage, and event log too.
    pub async fn run_detailed(&self, input: &str) -> Result<RunResult, AgentError> {
        self.run_with_cancellation(input, Cancellation::never())
            .await
    }

    /// Same as [`Agent::run_detailed`] but with an explicit cancellation
    /// handle threaded through every suspension point (spec §5, §9).
    pub async fn run_with_cancellation(
        &self,
        input: &str,
        cancellation: Cancellation,
    ) -> Result<RunResult, AgentError> {
        if input.trim().is_empty() {
            return Err(AgentError::InvalidInput(
                "Run input must not be empty".to_string(),
            ));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let session_id = self.session_id();
        let provider_name = self.provider.name().to_string();

        log::debug!(
            "run {} starting (session {}, provider {})",
            run_id,
            session_id,
            provider_name
        );

        let mut history = self.config.conversation_history.clone();
        history.push(Message::user(input));

        let mut record = RunRecord::starting(run_id.as_str(), session_id.as_str(), provider_name.as_str(), input);
        self.persist_best_effort(&record).await;

        let mut events = Vec::new();
        events.push(Event::new(
            EventType::RunStarted,
            run_id.as_str(),
            session_id.as_str(),
            provider_name.as_str(),
        ));
        emit_swallowing_errors(self.observer.as_ref(), events.last().unwrap().clone()).await;

        let mut usage_acc = Usage::default();
        let mut iteration = 0usize;

        loop {
            iteration += 1;
            if iteration > self.config.max_iterations {
                let err = AgentError::MaxIterations(self.config.max_iterations);
                return self
                    .fail_run(&mut record, "max_iterations", err, &history, usage_acc, &run_id, &session_id, &provider_name, &mut events)
                    .await;
            }

            let turn = self
                .run_turn(
                    &mut history,
                    iteration,
                    &cancellation,
                    &run_id,
                    &session_id,
                    &provider_name,
                    &mut events,
                )
                .await;

            let outcome = match turn {
                Ok(outcome) => outcome,
                Err((stage, err)) => {
                    return self
                        .fail_run(&mut record, stage, err, &history, usage_acc, &run_id, &session_id, &provider_name, &mut events)
                        .await;
                }
            };

            usage_acc.accumulate(&outcome.usage);
            record.mark_progress(&history, usage_acc);
            self.persist_best_effort(&record).await;

            match outcome.terminal {
                Some(output) => {
                    let now = Utc::now();
                    record.mark_completed(output.clone(), &history, usage_acc);
                    self.persist_best_effort(&record).await;

                    events.push(
                        Event::new(
                            EventType::RunCompleted,
                            run_id.as_str(),
                            session_id.as_str(),
                            provider_name.as_str(),
                        )
                        .with_iteration(iteration),
                    );
                    emit_swallowing_errors(self.observer.as_ref(), events.last().unwrap().clone()).await;

                    log::debug!("run {} completed after {} iteration(s)", run_id, iteration);

                    return Ok(RunResult {
                        output,
                        messages: history,
                        usage: usage_acc,
                        iterations: iteration,
                        provider: provider_name,
                        run_id,
                        session_id,
                        created_at: record.created_at,
                        completed_at: now,
                        events,
                    });
                }
                None => continue,
            }
        }
    }

    /// One iteration of the turn procedure (spec §4.1 steps 1-9), minus the
    /// iteration-cap check which the caller performs before invoking this.
    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        history: &mut Vec<Message>,
        iteration: usize,
        cancellation: &Cancellation,
        run_id: &str,
        session_id: &str,
        provider_name: &str,
        events: &mut Vec<Event>,
    ) -> Result<TurnOutcome, (&'static str, AgentError)> {
        let tool_defs = self.tool_registry.read().await.definitions();
        let mut request = self.build_request(history, &tool_defs).await;

        events.push(
            Event::new(EventType::BeforeGenerate, run_id, session_id, provider_name)
                .with_iteration(iteration),
        );
        emit_swallowing_errors(self.observer.as_ref(), events.last().unwrap().clone()).await;

        {
            let mut gen_event = GenerateEvent {
                request: &mut request,
                response: None,
                iteration,
            };
            self.middleware
                .run_before_generate(&mut gen_event)
                .await
                .map_err(|e| {
                    (
                        "before_generate",
                        AgentError::MiddlewareFailure {
                            stage: "before-generate",
                            message: e.to_string(),
                        },
                    )
                })?;
        }

        let mut response = self
            .generate_with_retry(&request, cancellation)
            .await
            .map_err(|e| ("generate", e))?;
        response.message.role = Role::Assistant;

        {
            let mut gen_event = GenerateEvent {
                request: &mut request,
                response: Some(&mut response),
                iteration,
            };
            self.middleware
                .run_after_generate(&mut gen_event)
                .await
                .map_err(|e| {
                    (
                        "after_generate",
                        AgentError::MiddlewareFailure {
                            stage: "after-generate",
                            message: e.to_string(),
                        },
                    )
                })?;
        }

        events.push(
            Event::new(EventType::AfterGenerate, run_id, session_id, provider_name)
                .with_iteration(iteration)
                .with_message(response.message.clone()),
        );
        emit_swallowing_errors(self.observer.as_ref(), events.last().unwrap().clone()).await;

        history.push(response.message.clone());

        let mut usage = response.usage.unwrap_or_default();
        let mut assistant_message = response.message;

        let mut retry_attempt = 0usize;
        while assistant_message.is_empty_assistant_turn() {
            retry_attempt += 1;
            if retry_attempt > EMPTY_RESPONSE_MAX_RETRIES {
                return Err(("empty_response", AgentError::EmptyAssistantResponse));
            }
            history.pop();

            let delay = EMPTY_RESPONSE_BACKOFF_STEP * retry_attempt as u32;
            if cancellation.race(tokio::time::sleep(delay)).await.is_err() {
                return Err(("empty_response", AgentError::Cancelled));
            }

            let mut retried = self
                .generate_with_retry(&request, cancellation)
                .await
                .map_err(|e| ("generate", e))?;
            retried.message.role = Role::Assistant;
            usage.accumulate(&retried.usage.unwrap_or_default());
            history.push(retried.message.clone());
            assistant_message = retried.message;
        }

        if assistant_message.tool_calls.is_empty() {
            if let Some(schema) = &self.config.response_schema {
                let _ = schema;
                if serde_json::from_str::<serde_json::Value>(&assistant_message.content).is_err() {
                    history.push(Message::user(SCHEMA_VIOLATION_PROMPT));
                    return Ok(TurnOutcome { terminal: None, usage });
                }
            }
            return Ok(TurnOutcome {
                terminal: Some(assistant_message.content.to_string()),
                usage,
            });
        }

        let snapshot: ToolSnapshot = {
            let registry = self.tool_registry.read().await;
            assistant_message
                .tool_calls
                .iter()
                .filter_map(|c| registry.get(&c.name).map(|t| (c.name.clone(), t)))
                .collect()
        };

        let options = DispatchOptions {
            parallel: self.config.parallel_tools,
            max_parallel: self.config.max_parallel_tools,
            tool_timeout: self.config.tool_timeout,
        };

        let outcome = dispatch::dispatch_batch(
            &snapshot,
            &assistant_message.tool_calls,
            &self.middleware,
            options,
            run_id,
            session_id,
            provider_name,
            iteration,
        )
        .await
        .map_err(|e| ("tool_dispatch", AgentError::ToolMiddlewareFailure(e.to_string())))?;

        for event in outcome.events {
            emit_swallowing_errors(self.observer.as_ref(), event.clone()).await;
            events.push(event);
        }
        history.extend(outcome.messages);

        Ok(TurnOutcome { terminal: None, usage })
    }

    async fn build_request(&self, history: &[Message], tools: &[crate::agentcore::message::ToolDefinition]) -> Request {
        let trimmed = trim_history(
            history,
            &self.config.system_prompt,
            tools,
            self.config.max_input_tokens,
            self.config.max_output_tokens,
        );
        Request {
            system_prompt: self.config.system_prompt.clone(),
            messages: trimmed,
            tools: tools.to_vec(),
            max_output_tokens: self.config.max_output_tokens,
            response_schema: self.config.response_schema.clone(),
        }
    }

    /// Generate-with-retry (spec §4.3): normal attempts bounded by
    /// `max_attempts`, a separate uncounted rate-limit schedule, and
    /// cancellation short-circuiting every sleep.
    async fn generate_with_retry(
        &self,
        request: &Request,
        cancellation: &Cancellation,
    ) -> Result<crate::agentcore::message::Response, AgentError> {
        let policy = &self.retry_policy;
        let mut attempt = 1usize;
        let mut rate_limit_attempt = 0usize;

        loop {
            let call = self.provider.generate(request);
            let outcome = match cancellation.race(call).await {
                Err(_) => return Err(AgentError::Cancelled),
                Ok(result) => result,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if err.is_rate_limit() {
                        rate_limit_attempt += 1;
                        if rate_limit_attempt > policy.rate_limit_max_attempts {
                            return Err(AgentError::RateLimitExhausted(err.to_string()));
                        }
                        let delay = policy.rate_limit_backoff(rate_limit_attempt);
                        if cancellation.race(tokio::time::sleep(delay)).await.is_err() {
                            return Err(AgentError::Cancelled);
                        }
                    } else {
                        if attempt >= policy.max_attempts {
                            return Err(AgentError::ProviderFailure(err.to_string()));
                        }
                        let delay = policy.normal_backoff(attempt);
                        if cancellation.race(tokio::time::sleep(delay)).await.is_err() {
                            return Err(AgentError::Cancelled);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }

    async fn persist_best_effort(&self, record: &RunRecord) {
        let recorder = RunRecorder::new(self.store.as_ref());
        if let Err(e) = recorder.save(record).await {
            log::warn!("failed to persist run record {}: {}", record.run_id, e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_run(
        &self,
        record: &mut RunRecord,
        stage: &'static str,
        err: AgentError,
        history: &[Message],
        usage: Usage,
        run_id: &str,
        session_id: &str,
        provider_name: &str,
        events: &mut Vec<Event>,
    ) -> Result<RunResult, AgentError> {
        let err_text = err.to_string();
        record.mark_failed(err_text.as_str(), history, usage);

        let recorder = RunRecorder::new(self.store.as_ref());
        let persist_result = recorder.save(record).await;

        events.push(
            Event::new(EventType::RunFailed, run_id, session_id, provider_name).with_error(err_text.clone()),
        );
        emit_swallowing_errors(self.observer.as_ref(), events.last().unwrap().clone()).await;

        self.middleware.notify_error(stage, &err_text).await;

        log::error!("run {} failed at stage {}: {}", run_id, stage, err_text);

        match persist_result {
            Ok(()) => Err(err),
            Err(store_error) => Err(err.with_persist_failure(store_error)),
        }
    }
}

struct TurnOutcome {
    terminal: Option<String>,
    usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentcore::event::EventSink;
    use crate::agentcore::message::{Response, ToolCall, ToolDefinition};
    use crate::agentcore::middleware::{Middleware, MiddlewareError};
    use async_trait::async_trait;
    use std::error::Error as StdError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedProvider {
        responses: AsyncMutex<Vec<Result<Response, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<Response, ProviderError>>) -> Self {
            Self {
                responses: AsyncMutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn generate(&self, _request: &Request) -> Result<Response, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .await
                .pop()
                .unwrap_or_else(|| Ok(assistant_response("fallback", vec![])))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn assistant_response(content: &str, tool_calls: Vec<ToolCall>) -> Response {
        Response {
            message: Message::assistant(content, tool_calls),
            usage: Some(Usage {
                input_tokens: 1,
                output_tokens: 1,
                total_tokens: 2,
            }),
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "test_tool".to_string(),
                description: "echoes its `value` argument".to_string(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> Result<serde_json::Value, Box<dyn StdError + Send + Sync>> {
            let value = arguments.get("value").cloned().unwrap_or(serde_json::Value::Null);
            Ok(serde_json::json!({ "echo": value }))
        }
    }

    // S1: single-turn success, no tools.
    #[tokio::test]
    async fn s1_single_turn_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(assistant_response("ok", vec![]))]));
        let agent = Agent::new(provider.clone(), AgentConfig::default());
        let result = agent.run_detailed("hello").await.unwrap();
        assert_eq!(result.output, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let types: Vec<_> = result.events.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::RunStarted));
        assert!(types.contains(&EventType::BeforeGenerate));
        assert!(types.contains(&EventType::AfterGenerate));
        assert!(types.contains(&EventType::RunCompleted));
    }

    // S2: tool round trip.
    #[tokio::test]
    async fn s2_tool_round_trip() {
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "test_tool".to_string(),
            arguments: serde_json::json!({"value": "hello"}),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("", vec![call])),
            Ok(assistant_response("done", vec![])),
        ]));
        let config = AgentConfig::default().with_tool(Arc::new(EchoTool));
        let agent = Agent::new(provider.clone(), config);
        let result = agent.run_detailed("run").await.unwrap();
        assert_eq!(result.output, "done");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let tool_msg = result
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("hello"));
    }

    // S3: provider retry.
    #[tokio::test]
    async fn s3_provider_retry_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::other("transient")),
            Ok(assistant_response("retried-ok", vec![])),
        ]));
        let policy = RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(20));
        let config = AgentConfig::default().with_retry_policy(policy);
        let agent = Agent::new(provider.clone(), config);
        let result = agent.run_detailed("go").await.unwrap();
        assert_eq!(result.output, "retried-ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    // S4: tool timeout.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "sleeps".to_string(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, Box<dyn StdError + Send + Sync>> {
            tokio::time::sleep(Duration::from_millis(75)).await;
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn s4_tool_timeout_then_completes() {
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "slow".to_string(),
            arguments: serde_json::json!({}),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("", vec![call])),
            Ok(assistant_response("done", vec![])),
        ]));
        let config = AgentConfig::default()
            .with_tool(Arc::new(SlowTool))
            .with_tool_timeout(Duration::from_millis(10));
        let agent = Agent::new(provider, config);
        let result = agent.run_detailed("go").await.unwrap();
        assert_eq!(result.output, "done");
        let tool_msg = result.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("deadline exceeded"));
    }

    // S5: iteration cap.
    #[tokio::test]
    async fn s5_iteration_cap_fails() {
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "test_tool".to_string(),
            arguments: serde_json::json!({}),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("", vec![call.clone()])),
            Ok(assistant_response("", vec![call])),
        ]));
        let config = AgentConfig::default()
            .with_max_iterations(1)
            .with_tool(Arc::new(EchoTool));
        let agent = Agent::new(provider, config);
        let err = agent.run_detailed("go").await.unwrap_err();
        assert_eq!(err.to_string(), "max iterations reached (1)");
    }

    // S6: middleware mutation.
    struct MutatingMiddleware;

    #[async_trait]
    impl Middleware for MutatingMiddleware {
        async fn before_generate(
            &self,
            event: &mut crate::agentcore::event::GenerateEvent<'_>,
        ) -> Result<(), MiddlewareError> {
            event.request.system_prompt = "from-middleware".to_string();
            Ok(())
        }

        async fn after_generate(
            &self,
            event: &mut crate::agentcore::event::GenerateEvent<'_>,
        ) -> Result<(), MiddlewareError> {
            if let Some(response) = event.response.as_deref_mut() {
                response.message.content = "mutated-output".into();
            }
            Ok(())
        }
    }

    struct ObservingProvider {
        seen_system_prompt: AsyncMutex<Option<String>>,
    }

    #[async_trait]
    impl Provider for ObservingProvider {
        async fn generate(&self, request: &Request) -> Result<Response, ProviderError> {
            *self.seen_system_prompt.lock().await = Some(request.system_prompt.clone());
            Ok(assistant_response("original", vec![]))
        }

        fn name(&self) -> &str {
            "observing"
        }
    }

    #[tokio::test]
    async fn s6_middleware_mutates_request_and_response() {
        let provider = Arc::new(ObservingProvider {
            seen_system_prompt: AsyncMutex::new(None),
        });
        let config = AgentConfig::default().with_middleware(Arc::new(MutatingMiddleware));
        let agent = Agent::new(provider.clone(), config);
        let result = agent.run_detailed("go").await.unwrap();
        assert_eq!(result.output, "mutated-output");
        assert_eq!(
            provider.seen_system_prompt.lock().await.as_deref(),
            Some("from-middleware")
        );
    }

    // S7: on-error notification.
    struct FailingBeforeGenerate {
        notified_stage: AsyncMutex<Option<String>>,
    }

    #[async_trait]
    impl Middleware for FailingBeforeGenerate {
        async fn before_generate(
            &self,
            _event: &mut crate::agentcore::event::GenerateEvent<'_>,
        ) -> Result<(), MiddlewareError> {
            Err("boom".into())
        }

        async fn on_error(&self, stage: &str, _error: &str) {
            *self.notified_stage.lock().await = Some(stage.to_string());
        }
    }

    #[tokio::test]
    async fn s7_before_generate_failure_notifies_on_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(assistant_response("unused", vec![]))]));
        let middleware = Arc::new(FailingBeforeGenerate {
            notified_stage: AsyncMutex::new(None),
        });
        let config = AgentConfig::default().with_middleware(middleware.clone());
        let agent = Agent::new(provider, config);
        let err = agent.run_detailed("go").await.unwrap_err();
        assert!(err.to_string().contains("middleware before-generate failed"));
        assert_eq!(
            middleware.notified_stage.lock().await.as_deref(),
            Some("before_generate")
        );
    }

    // An `after_generate` hook failure must be reported with the
    // "after-generate" stage name, not "before-generate" (spec §7).
    struct FailingAfterGenerate {
        notified_stage: AsyncMutex<Option<String>>,
    }

    #[async_trait]
    impl Middleware for FailingAfterGenerate {
        async fn after_generate(
            &self,
            _event: &mut crate::agentcore::event::GenerateEvent<'_>,
        ) -> Result<(), MiddlewareError> {
            Err("bang".into())
        }

        async fn on_error(&self, stage: &str, _error: &str) {
            *self.notified_stage.lock().await = Some(stage.to_string());
        }
    }

    #[tokio::test]
    async fn after_generate_failure_names_the_after_generate_stage() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(assistant_response("unused", vec![]))]));
        let middleware = Arc::new(FailingAfterGenerate {
            notified_stage: AsyncMutex::new(None),
        });
        let config = AgentConfig::default().with_middleware(middleware.clone());
        let agent = Agent::new(provider, config);
        let err = agent.run_detailed("go").await.unwrap_err();
        assert!(err.to_string().contains("middleware after-generate failed"));
        assert!(!err.to_string().contains("before-generate"));
        assert_eq!(
            middleware.notified_stage.lock().await.as_deref(),
            Some("after_generate")
        );
    }

    // Empty-response recovery.
    #[tokio::test]
    async fn empty_response_recovers_after_retries() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("", vec![])),
            Ok(assistant_response("", vec![])),
            Ok(assistant_response("recovered", vec![])),
        ]));
        let agent = Agent::new(provider.clone(), AgentConfig::default());
        let result = agent.run_detailed("go").await.unwrap();
        assert_eq!(result.output, "recovered");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_response_fails_after_exhausting_retries() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("", vec![])),
            Ok(assistant_response("", vec![])),
            Ok(assistant_response("", vec![])),
        ]));
        let agent = Agent::new(provider, AgentConfig::default());
        let err = agent.run_detailed("go").await.unwrap_err();
        assert!(err.to_string().contains("empty assistant content"));
    }

    // Schema violation loop-back.
    #[tokio::test]
    async fn schema_violation_consumes_an_iteration_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("not json", vec![])),
            Ok(assistant_response("{\"ok\":true}", vec![])),
        ]));
        let config = AgentConfig::default()
            .with_response_schema(serde_json::json!({"type": "object"}))
            .with_max_iterations(5);
        let agent = Agent::new(provider.clone(), config);
        let result = agent.run_detailed("go").await.unwrap();
        assert_eq!(result.output, "{\"ok\":true}");
        assert_eq!(result.iterations, 2);
        assert!(result
            .messages
            .iter()
            .any(|m| m.content.contains("not valid JSON")));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = Agent::new(provider, AgentConfig::default());
        let err = agent.run_detailed("   ").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn session_id_is_stable_across_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(assistant_response("a", vec![])),
            Ok(assistant_response("b", vec![])),
        ]));
        let agent = Agent::new(provider, AgentConfig::default());
        let r1 = agent.run_detailed("first").await.unwrap();
        let r2 = agent.run_detailed("second").await.unwrap();
        assert_eq!(r1.session_id, r2.session_id);
        assert_ne!(r1.run_id, r2.run_id);
    }

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn save_run(
            &self,
            _record: &RunRecord,
        ) -> Result<(), Box<dyn StdError + Send + Sync>> {
            Err("disk full".into())
        }
    }

    #[tokio::test]
    async fn persist_failure_on_fatal_path_wraps_both_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::other("boom"))]));
        let config = AgentConfig::default().with_store(Arc::new(FailingStore));
        let agent = Agent::new(provider, config);
        let err = agent.run_detailed("go").await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("generation failed"));
        assert!(text.contains("disk full"));
    }
}
