//! An illustrative instrumentor for a small in-process "demo" LLM client.
//!
//! Exercises the full contract every real instrumentor follows: a
//! [`crate::wrap::Handler`] that shapes request/response attributes, a
//! [`crate::stream::ChunkHandler`] for its streaming call, and a
//! [`crate::registry::InstrumentorDescriptor`] tying both to detection and
//! activation. Real instrumentors (for an actual OpenAI/Anthropic/agent
//! framework client) follow this exact shape; this one exists so the crate
//! is exercised end-to-end without a network dependency in tests and demos.

use std::sync::Arc;
use std::time::Duration;

use crate::attributes::{encode_pairs, HostValue};
use crate::provider::{Provider, ProviderHandle};
use crate::registry::{DetectOutcome, InstrumentorDescriptor};
use crate::semconv;
use crate::span::SpanKind;
use crate::stream::{ChunkHandler, SpanIterStream};
use crate::wrap::{CallInfo, Handler, WrapPoint};

/// Stands in for a host LLM client. Always "present" at its declared
/// version, since there's nothing to dynamically detect for an in-process
/// stub -- real instrumentors replace `detect` with an actual probe.
pub struct DemoClient {
    pub model: String,
}

impl DemoClient {
    pub fn new(model: impl Into<String>) -> Self {
        DemoClient { model: model.into() }
    }

    fn complete_impl(&self, prompt: &str) -> Result<String, String> {
        if prompt.is_empty() {
            return Err("empty prompt".to_string());
        }
        Ok(format!("demo response to: {prompt}"))
    }

    fn stream_complete_impl(&self, prompt: &str) -> impl Iterator<Item = Result<String, String>> + use<> {
        let chunks: Vec<Result<String, String>> = if prompt.is_empty() {
            vec![Err("empty prompt".to_string())]
        } else {
            "demo streamed response"
                .split(' ')
                .map(|word| Ok(format!("{word} ")))
                .collect()
        };
        chunks.into_iter()
    }
}

/// Request/response span shaping for [`DemoClient::complete`].
pub struct DemoHandler;

impl Handler for DemoHandler {
    fn before(&self, call: &CallInfo) -> Vec<(String, HostValue)> {
        let mut out = vec![(semconv::llm_request::MODEL.to_string(), HostValue::Str(demo_model(call)))];
        for (name, value) in &call.args {
            if name == "prompt" {
                if let HostValue::Str(prompt) = value {
                    out.push((semconv::llm_request::message_content(0), HostValue::Str(prompt.clone())));
                    out.push((semconv::llm_request::message_role(0), HostValue::Str("user".to_string())));
                }
            }
        }
        out
    }

    fn after_success(&self, outcome: &HostValue) -> Vec<(String, HostValue)> {
        match outcome {
            HostValue::Str(text) => vec![(semconv::llm_response::completion_content(0), HostValue::Str(text.clone()))],
            _ => Vec::new(),
        }
    }

    fn after_error(&self, error: &str) -> Vec<(String, HostValue)> {
        vec![(semconv::error::MESSAGE.to_string(), HostValue::Str(error.to_string()))]
    }
}

fn demo_model(call: &CallInfo) -> String {
    call.args
        .iter()
        .find(|(name, _)| name == "model")
        .and_then(|(_, v)| match v {
            HostValue::Str(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "demo-model".to_string())
}

/// Chunk shaping for [`DemoClient::stream_complete`].
pub struct DemoStreamHandler;

impl ChunkHandler<String> for DemoStreamHandler {
    fn extract_content(&self, chunk: &String) -> Option<String> {
        Some(chunk.clone())
    }

    fn on_finish(&self, _accumulated: &str, _chunk_count: usize) -> Vec<(String, HostValue)> {
        vec![(semconv::llm_response::STREAMING.to_string(), HostValue::Bool(true))]
    }
}

/// Everything one caller needs to invoke the wrapped demo client and
/// register it with a [`crate::registry::Registry`].
pub struct DemoInstrumentor {
    pub complete_wrap: Arc<WrapPoint<DemoHandler>>,
}

impl DemoInstrumentor {
    pub fn new() -> Self {
        DemoInstrumentor {
            complete_wrap: WrapPoint::new("demo_client", "complete", SpanKind::Client, "demo_client.{symbol}", DemoHandler),
        }
    }

    pub fn descriptor(&self) -> InstrumentorDescriptor {
        InstrumentorDescriptor {
            name: "demo_client",
            detect: Box::new(|| DetectOutcome::Present { version: "1.0.0".to_string() }),
            version_satisfies: Box::new(|_version| true),
            wraps: vec![self.complete_wrap.clone()],
        }
    }

    pub fn complete(&self, provider: &Provider, client: &DemoClient, prompt: &str) -> Result<String, String> {
        let call = CallInfo::new().with_arg("model", client.model.clone()).with_arg("prompt", prompt);
        self.complete_wrap.call_sync(provider, call, |s: &String| HostValue::Str(s.clone()), || client.complete_impl(prompt))
    }

    /// Streaming calls aren't represented in [`crate::wrap::WrapPoint`]
    /// (its span lifetime ends with the call); instead the span is opened
    /// directly and handed to [`SpanIterStream`], mirroring how a real
    /// instrumentor's wrapper detects a lazy-sequence return value (§4.5
    /// step 4) and transfers ownership to the stream adapter.
    pub fn stream_complete(
        &self,
        provider_handle: ProviderHandle,
        client: &DemoClient,
        prompt: &str,
    ) -> SpanIterStream<impl Iterator<Item = Result<String, String>>, DemoStreamHandler, String, String> {
        let attrs = encode_pairs(vec![
            (semconv::llm_request::MODEL.to_string(), HostValue::Str(client.model.clone())),
            (semconv::llm_request::STREAM.to_string(), HostValue::Bool(true)),
        ]);

        let id_gen = opentelemetry_sdk::trace::RandomIdGenerator::default();
        use opentelemetry_sdk::trace::IdGenerator;
        let parent = crate::context::current();
        let (trace_id, parent_span_id) = match &parent {
            Some(ctx) => (ctx.trace_id, ctx.span_id),
            None => (id_gen.new_trace_id(), opentelemetry::trace::SpanId::INVALID),
        };
        let span_id = id_gen.new_span_id();
        let mut span = if parent.is_some() {
            crate::span::Span::new_child("demo_client.stream_complete", SpanKind::Client, trace_id, span_id, parent_span_id)
        } else {
            crate::span::Span::new_root("demo_client.stream_complete", SpanKind::Client, trace_id, span_id)
        };
        span.merge_attributes(attrs);
        provider_handle.on_span_start(span.clone());

        SpanIterStream::new(client.stream_complete_impl(prompt), DemoStreamHandler, span, provider_handle)
    }
}

impl Default for DemoInstrumentor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttrValue;
    use crate::config::Config;
    use crate::diagnostics::Counters;
    use crate::exporter::StubExporter;

    fn test_provider() -> (Provider, Arc<StubExporter>) {
        let resource = crate::resource::build(&Config::from_env());
        let exporter = Arc::new(StubExporter::new());
        (Provider::start(resource, exporter.clone(), Counters::new()), exporter)
    }

    #[tokio::test]
    async fn complete_produces_a_span_with_request_and_response_attributes() {
        let (provider, exporter) = test_provider();
        let instrumentor = DemoInstrumentor::new();
        instrumentor.complete_wrap.enable();
        let client = DemoClient::new("demo-model-1");

        let result = instrumentor.complete(&provider, &client, "hello");
        assert_eq!(result.unwrap(), "demo response to: hello");

        provider.shutdown(Duration::from_secs(1)).await;
        let spans = exporter.all_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].attributes.get(semconv::llm_request::MODEL),
            Some(&AttrValue::Str("demo-model-1".to_string()))
        );
    }

    #[tokio::test]
    async fn stream_complete_yields_chunks_and_closes_with_streaming_attribute() {
        let (provider, exporter) = test_provider();
        let instrumentor = DemoInstrumentor::new();
        let client = DemoClient::new("demo-model-1");

        let stream = instrumentor.stream_complete(provider.handle(), &client, "hi");
        let chunks: Vec<_> = stream.collect();
        assert!(!chunks.is_empty());

        provider.shutdown(Duration::from_secs(1)).await;
        let spans = exporter.all_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].attributes.get(semconv::llm_response::STREAMING),
            Some(&AttrValue::Bool(true))
        );
    }

    #[test]
    fn registry_cycle_activates_and_deactivates_the_demo_instrumentor() {
        let instrumentor = DemoInstrumentor::new();
        let registry = crate::registry::Registry::new();
        registry.register(instrumentor.descriptor());
        registry.detect_all();
        registry.activate("demo_client");
        assert!(instrumentor.complete_wrap.is_enabled());
        registry.deactivate("demo_client");
        assert!(!instrumentor.complete_wrap.is_enabled());
    }
}
