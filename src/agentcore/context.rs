//! Context-window trimming (spec §4.4).
//!
//! The teacher's `context_strategy` module is a pluggable
//! `should_compact`/`compact` trait keyed off `LLMSession`'s running
//! token estimate, with three strategies of increasing sophistication
//! (`TrimStrategy`, `SelfCompressionStrategy`, `NoveltyAwareStrategy`).
//! The LLM-assisted compression strategies depend on a `ThoughtChain`
//! and call back into the model, which is out of scope for a pure
//! context-trimming function. What survives is the threshold-ratio
//! token-budget idea and the teacher's `count_tokens`
//! (`len / 4`-style) approximation from `llm_session.rs`, reshaped into
//! the pure suffix-selection function the spec calls for.

use crate::agentcore::message::{Message, ToolDefinition};

/// Cheap, provider-agnostic token estimate: one token per four
/// characters of content, matching the teacher's `count_tokens`
/// approximation in `llm_session.rs`. Monotonic in the sense the spec
/// requires: dropping a message only ever lowers the total.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = estimate_tokens(&message.content);
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name);
        total += estimate_tokens(&call.arguments.to_string());
    }
    if let Some(name) = &message.name {
        total += estimate_tokens(name);
    }
    total
}

fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| {
            estimate_tokens(&t.name)
                + estimate_tokens(&t.description)
                + estimate_tokens(&t.parameters_schema.to_string())
        })
        .sum()
}

/// Whether cutting `history` at `start` (keeping `history[start..]`, plus
/// `history[0]` separately) leaves no tool message whose originating
/// assistant message was cut away (invariant I2).
///
/// This must hold for *every* assistant/tool-call block in the kept
/// window, not only the most recent one: a run that has gone through more
/// than one tool round trip before trimming happens has several such
/// blocks in its history, and a `start` landing inside an earlier one
/// orphans its tool message just as surely as landing inside the last one.
fn is_valid_start(history: &[Message], start: usize) -> bool {
    use crate::agentcore::message::Role;
    use std::collections::HashSet;

    let mut live_call_ids: HashSet<&str> = HashSet::new();
    for message in &history[start..] {
        match message.role {
            Role::Assistant => {
                live_call_ids.clear();
                for call in &message.tool_calls {
                    live_call_ids.insert(call.id.as_str());
                }
            }
            Role::Tool => {
                if let Some(id) = &message.tool_call_id {
                    if !live_call_ids.contains(id.as_str()) {
                        return false;
                    }
                }
            }
            _ => {}
        }
    }
    true
}

/// Every index `history` can be safely truncated to, in ascending order.
/// Always contains at least `0` (the untruncated history, which the
/// agent loop guarantees already satisfies I2).
fn valid_starts(history: &[Message]) -> Vec<usize> {
    (0..history.len())
        .filter(|&start| is_valid_start(history, start))
        .collect()
}

/// Pure suffix-of-history trimming that fits `estimate(S, H', T) + reserve
/// <= budget`, always keeping `history[0]` and never splitting an
/// assistant message from the tool messages answering it (I2).
///
/// `history` must be non-empty; the caller (the agent loop) guarantees
/// this since `Run`'s precondition already rejects empty input.
pub fn trim_history(
    history: &[Message],
    system_prompt: &str,
    tools: &[ToolDefinition],
    budget: usize,
    reserve: usize,
) -> Vec<Message> {
    if history.is_empty() {
        return Vec::new();
    }

    let fixed_cost = estimate_tokens(system_prompt) + estimate_tools_tokens(tools) + reserve;
    let available = budget.saturating_sub(fixed_cost);

    let starts = valid_starts(history);
    let floor = *starts.last().expect("0 is always a valid start");

    // Try every valid suffix start in ascending order (widest fit that
    // still respects I2 for every block, not only the last one), falling
    // back to the narrowest valid start (maximal truncation) and accepting
    // overshoot if even that doesn't fit the budget.
    for start in starts {
        let mut candidate: Vec<usize> = vec![0];
        if start > 0 {
            candidate.extend(start..history.len());
        } else {
            candidate = (0..history.len()).collect();
        }
        let cost: usize = candidate.iter().map(|&i| estimate_message_tokens(&history[i])).sum();
        if cost <= available || start == floor {
            return candidate.into_iter().map(|i| history[i].clone()).collect();
        }
    }

    unreachable!("valid_starts always contains 0, and the loop returns on its last element")
}

/// Default input-token budget when the agent configuration leaves it
/// unset.
pub const DEFAULT_INPUT_TOKEN_BUDGET: usize = 25_000;
