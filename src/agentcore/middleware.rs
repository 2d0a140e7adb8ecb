//! Middleware pipeline (spec §4.5).
//!
//! Grounded in the teacher's `EventHandler` trait: a `Send + Sync`
//! trait object with default no-op method bodies so implementors only
//! override the hooks they care about, shared across tasks behind
//! `Arc<dyn _>`. The difference here is that hooks are fallible (they can
//! abort the run) and mutate the event they're passed, rather than being
//! pure observation callbacks.

use crate::agentcore::event::{GenerateEvent, ToolEvent};
use async_trait::async_trait;
use std::error::Error as StdError;

pub type MiddlewareError = Box<dyn StdError + Send + Sync>;

/// An ordered observer/mutator invoked at the generate and tool
/// boundaries (spec §4.5). All hooks default to a no-op `Ok(())`; an
/// implementor overrides only the phases it needs.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_generate(&self, _event: &mut GenerateEvent<'_>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    async fn after_generate(&self, _event: &mut GenerateEvent<'_>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    async fn before_tool(&self, _event: &mut ToolEvent<'_>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    async fn after_tool(&self, _event: &mut ToolEvent<'_>) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Notification-only: called on every registered middleware whenever
    /// any fatal error occurs, regardless of which middleware (if any)
    /// caused it. Must never propagate a panic — the pipeline catches
    /// one with [`std::panic::AssertUnwindSafe`] and swallows it.
    async fn on_error(&self, _stage: &str, _error: &str) {}

    /// Human-readable name used only for logging.
    fn name(&self) -> &str {
        "middleware"
    }
}

/// Ordered chain of [`Middleware`], invoked in registration order for
/// before/after hooks.
#[derive(Default)]
pub struct MiddlewarePipeline {
    stages: Vec<std::sync::Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn register(&mut self, middleware: std::sync::Arc<dyn Middleware>) {
        self.stages.push(middleware);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run_before_generate(&self, event: &mut GenerateEvent<'_>) -> Result<(), MiddlewareError> {
        for stage in &self.stages {
            stage.before_generate(event).await?;
        }
        Ok(())
    }

    pub async fn run_after_generate(&self, event: &mut GenerateEvent<'_>) -> Result<(), MiddlewareError> {
        for stage in &self.stages {
            stage.after_generate(event).await?;
        }
        Ok(())
    }

    pub async fn run_before_tool(&self, event: &mut ToolEvent<'_>) -> Result<(), MiddlewareError> {
        for stage in &self.stages {
            stage.before_tool(event).await?;
        }
        Ok(())
    }

    pub async fn run_after_tool(&self, event: &mut ToolEvent<'_>) -> Result<(), MiddlewareError> {
        for stage in &self.stages {
            stage.after_tool(event).await?;
        }
        Ok(())
    }

    /// Calls `on_error` on every registered middleware, regardless of
    /// prior failures, swallowing anything a misbehaving implementation
    /// throws back at us.
    pub async fn notify_error(&self, stage: &str, error: &str) {
        for mw in &self.stages {
            let result = std::panic::AssertUnwindSafe(mw.on_error(stage, error))
                .catch_unwind()
                .await;
            if result.is_err() {
                log::warn!("middleware {} panicked in on_error, ignoring", mw.name());
            }
        }
    }
}

/// Brings `.catch_unwind()` to an arbitrary future without adding a new
/// dependency for it.
trait CatchUnwindExt: std::future::Future + Sized {
    fn catch_unwind(self) -> futures_util::future::CatchUnwind<futures_util::future::AssertUnwindSafe<Self>>
    where
        Self: std::panic::UnwindSafe,
    {
        futures_util::FutureExt::catch_unwind(futures_util::future::AssertUnwindSafe(self))
    }
}

impl<F: std::future::Future + Sized> CatchUnwindExt for F {}
