//! The provider contract the agent loop calls against.
//!
//! Concrete vendor wire encodings are explicitly out of scope for this
//! crate (see spec §1) — this module defines only the trait the loop
//! depends on, mirroring the teacher's `ClientWrapper` trait in shape
//! (`Send + Sync`, `async_trait`, a streaming hook with a no-op default)
//! while trading the teacher's bespoke `Message` for the generalized
//! [`crate::agentcore::message`] model that carries structured tool calls.

use crate::agentcore::message::{Message, Request, Response};
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;

/// A chunk of a streamed response, used only by the lite single-turn
/// streaming path that bypasses tool orchestration (spec §6).
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

pub type ChunkStream =
    Pin<Box<dyn futures_util::Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Error returned by a [`Provider`].
///
/// `kind` lets the retry classifier (§4.3) recognize rate-limit errors by
/// identity without downcasting through `dyn Error`, the way the spec's
/// provider contract asks for ("providers signal rate limiting through a
/// recognizable error kind").
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Other,
}

impl ProviderError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            message: message.into(),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimited
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ProviderError {}

/// Trait-driven abstraction over a concrete language-model backend.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between the agent's async tasks via `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run one full request/response generation call.
    ///
    /// The returned [`Message`] must have `role = Assistant`; if the
    /// concrete provider's wire format yields something else, the
    /// implementation is responsible for normalizing it before returning
    /// (the agent loop normalizes defensively too — see
    /// [`crate::agentcore::agent::Agent`] step 5).
    async fn generate(&self, request: &Request) -> Result<Response, ProviderError>;

    /// Optional streaming variant backing the lite single-turn path.
    ///
    /// Providers without streaming support can inherit the default, which
    /// resolves to `Ok(None)`.
    async fn generate_stream(
        &self,
        _request: &Request,
    ) -> Result<Option<ChunkStream>, ProviderError> {
        Ok(None)
    }

    /// Identifier recorded in [`crate::agentcore::event::Event`]s and
    /// [`crate::agentcore::store::RunRecord`]s (e.g. `"openai:gpt-4.1"`).
    fn name(&self) -> &str;
}
