//! Instrumentors: per-host-library descriptors registered with
//! [`crate::registry::Registry`] (§4.7).
//!
//! Real instrumentors (an OpenAI client, an Anthropic client, a particular
//! agent framework) live outside this crate as separate feature-gated
//! modules following the shape of [`demo`]; this crate ships the one
//! illustrative instrumentor plus the machinery they all build on.

pub mod demo;
