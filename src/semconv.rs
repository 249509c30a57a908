//! Canonical attribute-name constants for AI telemetry (C1, §4.1).
//!
//! A closed vocabulary: every attribute an ended span carries must be one of
//! these names, a `{i}`/`{j}`-indexed member of one of these families, or
//! begin with `custom.` (enforced informally by callers; asserted in tests,
//! see §8 "for all ended spans: attribute keys are members of the semantic
//! convention set, or begin with `custom.`").
//!
//! Layout follows the grouped `pub mod` style used for GenAI conventions in
//! the wider pack (e.g. `gen_ai`/`agent`/`retrieval` modules in comparable
//! observability crates) rather than one flat list of constants.

/// LLM request attributes.
pub mod llm_request {
    pub const MODEL: &str = "llm.request.model";
    pub const TEMPERATURE: &str = "llm.request.temperature";
    pub const MAX_TOKENS: &str = "llm.request.max_tokens";
    pub const STREAM: &str = "llm.request.stream";

    /// `llm.request.messages.{i}.role`
    pub fn message_role(i: usize) -> String {
        format!("llm.request.messages.{i}.role")
    }
    /// `llm.request.messages.{i}.content`
    pub fn message_content(i: usize) -> String {
        format!("llm.request.messages.{i}.content")
    }
    /// `llm.request.tools.{i}.name`
    pub fn tool_name(i: usize) -> String {
        format!("llm.request.tools.{i}.name")
    }
}

/// LLM response attributes.
pub mod llm_response {
    pub const MODEL: &str = "llm.response.model";
    pub const ID: &str = "llm.response.id";
    pub const FINISH_REASON: &str = "llm.response.finish_reason";
    pub const STREAMING: &str = "llm.response.streaming";
    pub const TIME_TO_FIRST_TOKEN_MS: &str = "llm.response.time_to_first_token_ms";
    pub const CHUNK_COUNT: &str = "llm.response.chunk_count";

    /// `llm.response.completions.{i}.content`
    pub fn completion_content(i: usize) -> String {
        format!("llm.response.completions.{i}.content")
    }
    /// `llm.response.completions.{i}.tool_calls.{j}.name`
    pub fn tool_call_name(i: usize, j: usize) -> String {
        format!("llm.response.completions.{i}.tool_calls.{j}.name")
    }
    /// `llm.response.completions.{i}.tool_calls.{j}.arguments`
    pub fn tool_call_arguments(i: usize, j: usize) -> String {
        format!("llm.response.completions.{i}.tool_calls.{j}.arguments")
    }
}

/// Token usage. Cost is deliberately absent: it is derived backend-side
/// from a price table and MUST NOT be set by the SDK (§4.1).
pub mod llm_usage {
    pub const PROMPT_TOKENS: &str = "llm.usage.prompt_tokens";
    pub const COMPLETION_TOKENS: &str = "llm.usage.completion_tokens";
    pub const TOTAL_TOKENS: &str = "llm.usage.total_tokens";
}

/// Agent/tool/handoff attributes.
pub mod agent {
    pub const NAME: &str = "agent.name";
    pub const ROLE: &str = "agent.role";
    pub const TOOL_NAME: &str = "tool.name";
    pub const TOOL_ARGUMENTS: &str = "tool.arguments";
    pub const TOOL_RESULT: &str = "tool.result";
    pub const HANDOFF_FROM: &str = "handoff.from";
    pub const HANDOFF_TO: &str = "handoff.to";
}

/// Error attributes (paired with span status `error`).
pub mod error {
    pub const TYPE: &str = "error.type";
    pub const MESSAGE: &str = "error.message";
}

/// Attributes describing the encoder's own behavior (truncation, depth
/// limiting) rather than host data, per §4.2.
pub mod meta {
    pub const TRUNCATED_SUFFIX: &str = "_truncated";
    pub const DEPTH_LIMITED_MARKER: &str = "<depth-limited>";
    pub const STREAM_ABANDONED: &str = "stream.abandoned";
    pub const SPAN_IN_FLIGHT: &str = "span.in_flight";
}

/// The prefix reserved for attributes set by embedders/host integrations
/// that don't fit the closed vocabulary above.
pub const CUSTOM_PREFIX: &str = "custom.";

/// `true` if `key` is either a literal semantic-convention name, a
/// `{i}`/`{j}`-indexed member of one of the families above, or begins with
/// [`CUSTOM_PREFIX`]. Used by tests asserting the §8 closed-vocabulary
/// invariant; not enforced at write time (the encoder is trusted to only
/// ever be called with these names by handler authors).
pub fn is_known_attribute(key: &str) -> bool {
    if key.starts_with(CUSTOM_PREFIX) {
        return true;
    }
    const LITERALS: &[&str] = &[
        llm_request::MODEL,
        llm_request::TEMPERATURE,
        llm_request::MAX_TOKENS,
        llm_request::STREAM,
        llm_response::MODEL,
        llm_response::ID,
        llm_response::FINISH_REASON,
        llm_response::STREAMING,
        llm_response::TIME_TO_FIRST_TOKEN_MS,
        llm_response::CHUNK_COUNT,
        llm_usage::PROMPT_TOKENS,
        llm_usage::COMPLETION_TOKENS,
        llm_usage::TOTAL_TOKENS,
        agent::NAME,
        agent::ROLE,
        agent::TOOL_NAME,
        agent::TOOL_ARGUMENTS,
        agent::TOOL_RESULT,
        agent::HANDOFF_FROM,
        agent::HANDOFF_TO,
        error::TYPE,
        error::MESSAGE,
        meta::STREAM_ABANDONED,
        meta::SPAN_IN_FLIGHT,
    ];
    if LITERALS.contains(&key) {
        return true;
    }
    const INDEXED_PREFIXES: &[&str] = &[
        "llm.request.messages.",
        "llm.request.tools.",
        "llm.response.completions.",
    ];
    if INDEXED_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return true;
    }
    key.ends_with(meta::TRUNCATED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_literal_and_indexed_and_custom_names() {
        assert!(is_known_attribute(llm_usage::TOTAL_TOKENS));
        assert!(is_known_attribute(&llm_request::message_role(3)));
        assert!(is_known_attribute(&llm_response::tool_call_name(0, 2)));
        assert!(is_known_attribute("custom.anything.goes"));
        assert!(!is_known_attribute("totally.unrelated.key"));
    }
}
