//! The generic call-site wrapping primitive (C5, §5).
//!
//! A host language with monkey-patching can swap a library symbol for an
//! instrumented proxy at runtime; Rust has no such hook, so per the
//! redesign notes this is modeled as an explicit, statically-typed wrap
//! point that an instrumentor constructs once (naming the module/symbol it
//! stands in for, purely for span naming and diagnostics) and every call
//! site invokes directly. The wrap is "reversible" in the sense the
//! contract actually cares about: disabling it makes every call a
//! transparent pass-through with zero span production, without the caller
//! changing a single call site.
//!
//! Grounded on the pack's `InstrumentedSpan` pattern (start timer, run the
//! real call, record outcome into an OTel span) generalized into a
//! `Handler` trait so instrumentors supply only the LLM/agent-specific
//! attribute logic, not the span lifecycle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};

use crate::attributes::{encode_pairs, HostValue};
use crate::context::{self, TraceContext};
use crate::provider::Provider;
use crate::span::{Span, SpanKind, SpanStatus};

/// The arguments a wrapped call was invoked with, already converted to
/// [`HostValue`] by the instrumentor (never re-derived by `wrap.rs` itself,
/// which has no knowledge of the host library's argument shapes).
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    pub args: Vec<(String, HostValue)>,
}

impl CallInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }
}

/// LLM/agent-specific span-shaping logic for one wrapped symbol. Methods
/// return raw `(name, value)` pairs rather than already-encoded attributes --
/// [`WrapPoint`] runs every pair through [`crate::attributes::Encoder`]
/// before merging it onto the span, so string
/// truncation, depth limiting, and null omission (§4.2) apply uniformly
/// regardless of which handler produced the value.
///
/// All methods are synchronous and infallible by contract: a handler that
/// panics is contained by [`WrapPoint`] (§5 "a handler exception must never
/// propagate to the wrapped call's caller, nor suppress the call's own
/// result or exception") and simply contributes no attributes for that
/// phase.
pub trait Handler: Send + Sync {
    /// Attribute pairs to merge onto the span before the real call runs.
    fn before(&self, call: &CallInfo) -> Vec<(String, HostValue)>;
    /// Attribute pairs to merge once the real call has returned successfully.
    fn after_success(&self, outcome: &HostValue) -> Vec<(String, HostValue)> {
        let _ = outcome;
        Vec::new()
    }
    /// Attribute pairs to merge once the real call has raised/returned an error.
    fn after_error(&self, error: &str) -> Vec<(String, HostValue)> {
        let _ = error;
        Vec::new()
    }
}

fn catch_handler<T: Default>(label: &str, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(phase = label, "instrumentation handler panicked; attributes for this phase dropped");
            T::default()
        }
    }
}

/// One instrumented call site. Constructed once by an instrumentor at
/// activation time and shared (via `Arc`) across every invocation of the
/// symbol it names.
pub struct WrapPoint<H: Handler> {
    module: &'static str,
    symbol: &'static str,
    kind: SpanKind,
    name_template: &'static str,
    handler: H,
    enabled: AtomicBool,
}

impl<H: Handler> WrapPoint<H> {
    pub fn new(module: &'static str, symbol: &'static str, kind: SpanKind, name_template: &'static str, handler: H) -> Arc<Self> {
        Arc::new(WrapPoint {
            module,
            symbol,
            kind,
            name_template,
            handler,
            // registry.rs's `activate` is the thing that flips this on;
            // a freshly-built wrap point is inert until then (§4.7).
            enabled: AtomicBool::new(false),
        })
    }

    pub fn module(&self) -> &'static str {
        self.module
    }
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Deactivate: subsequent calls become transparent pass-throughs.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn start_span(&self, call: &CallInfo) -> (Span, TraceContext) {
        let id_gen = RandomIdGenerator::default();
        let parent = context::current();
        let (trace_id, parent_span_id) = match &parent {
            Some(ctx) => (ctx.trace_id, ctx.span_id),
            None => (id_gen.new_trace_id(), opentelemetry::trace::SpanId::INVALID),
        };
        let span_id = id_gen.new_span_id();
        let name = self.name_template.replace("{symbol}", self.symbol);
        let mut span = if parent.is_some() {
            Span::new_child(name, self.kind, trace_id, span_id, parent_span_id)
        } else {
            Span::new_root(name, self.kind, trace_id, span_id)
        };
        span.merge_attributes(encode_pairs(catch_handler("before", || self.handler.before(call))));
        let new_ctx = parent.map(|p| p.child(span_id)).unwrap_or_else(|| TraceContext::root(trace_id, span_id));
        (span, new_ctx)
    }

    /// Wrap a synchronous call. `original` is invoked exactly once,
    /// regardless of handler outcome.
    pub fn call_sync<T, E>(
        &self,
        provider: &Provider,
        call: CallInfo,
        to_host_value: impl Fn(&T) -> HostValue,
        original: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        if !self.is_enabled() {
            return original();
        }
        let (mut span, ctx) = self.start_span(&call);
        let _guard = context::enter(ctx);
        provider.on_span_start(span.clone());

        let result = original();
        match &result {
            Ok(value) => {
                let outcome = to_host_value(value);
                span.merge_attributes(encode_pairs(catch_handler("after_success", || self.handler.after_success(&outcome))));
                span.end(SpanStatus::Ok);
            }
            Err(err) => {
                let message = err.to_string();
                span.merge_attributes(encode_pairs(catch_handler("after_error", || self.handler.after_error(&message))));
                span.end(SpanStatus::Error { message: Some(message) });
            }
        }
        provider.on_span_end(span);
        result
    }

    /// Wrap an asynchronous call. The returned future carries the trace
    /// context across every `.await` point via [`context::with_context`],
    /// so suspension inside `original` doesn't lose span parentage.
    pub async fn call_async<T, E, Fut>(
        &self,
        provider: &Provider,
        call: CallInfo,
        to_host_value: impl Fn(&T) -> HostValue,
        original: impl FnOnce() -> Fut,
    ) -> Result<T, E>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.is_enabled() {
            return original().await;
        }
        let (mut span, ctx) = self.start_span(&call);
        provider.on_span_start(span.clone());

        let result = context::with_context(ctx, original()).await;
        match &result {
            Ok(value) => {
                let outcome = to_host_value(value);
                span.merge_attributes(encode_pairs(catch_handler("after_success", || self.handler.after_success(&outcome))));
                span.end(SpanStatus::Ok);
            }
            Err(err) => {
                let message = err.to_string();
                span.merge_attributes(encode_pairs(catch_handler("after_error", || self.handler.after_error(&message))));
                span.end(SpanStatus::Error { message: Some(message) });
            }
        }
        provider.on_span_end(span);
        result
    }
}

/// Object-safe facet of [`WrapPoint`] used by the registry (C7) to enable
/// and disable wraps it didn't construct and doesn't know the `Handler`
/// type of.
pub trait WireableWrap: Send + Sync {
    fn module(&self) -> &'static str;
    fn symbol(&self) -> &'static str;
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

impl<H: Handler> WireableWrap for WrapPoint<H> {
    fn module(&self) -> &'static str {
        WrapPoint::module(self)
    }
    fn symbol(&self) -> &'static str {
        WrapPoint::symbol(self)
    }
    fn enable(&self) {
        WrapPoint::enable(self)
    }
    fn disable(&self) {
        WrapPoint::disable(self)
    }
    fn is_enabled(&self) -> bool {
        WrapPoint::is_enabled(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::diagnostics::Counters;
    use crate::exporter::StubExporter;
    use std::sync::Arc as StdArc;

    struct EchoHandler;
    impl Handler for EchoHandler {
        fn before(&self, call: &CallInfo) -> Vec<(String, HostValue)> {
            call.args
                .iter()
                .filter(|(_, value)| matches!(value, HostValue::Str(_)))
                .map(|(name, value)| (format!("custom.{name}"), value.clone()))
                .collect()
        }
    }

    struct PanickingHandler;
    impl Handler for PanickingHandler {
        fn before(&self, _call: &CallInfo) -> Vec<(String, HostValue)> {
            panic!("boom");
        }
    }

    fn test_provider() -> Provider {
        let resource = crate::resource::build(&Config::from_env());
        Provider::start(resource, StdArc::new(StubExporter::new()), Counters::new())
    }

    #[tokio::test]
    async fn sync_wrap_never_alters_the_original_result() {
        let provider = test_provider();
        let point = WrapPoint::new("demo", "greet", SpanKind::Internal, "demo.{symbol}", EchoHandler);
        point.enable();
        let call = CallInfo::new().with_arg("name", "ada");
        let result: Result<String, String> = point.call_sync(
            &provider,
            call,
            |s: &String| HostValue::Str(s.clone()),
            || Ok("hello ada".to_string()),
        );
        assert_eq!(result.unwrap(), "hello ada");
        provider.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn disabled_wrap_point_is_a_pure_passthrough() {
        let provider = test_provider();
        let point = WrapPoint::new("demo", "greet", SpanKind::Internal, "demo.{symbol}", EchoHandler);
        point.disable();
        let result: Result<i64, String> =
            point.call_sync(&provider, CallInfo::new(), |v: &i64| HostValue::Int(*v), || Ok(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(provider.counters.snapshot().spans_ended, 0);
        provider.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn panicking_handler_does_not_affect_the_wrapped_result() {
        let provider = test_provider();
        let point = WrapPoint::new("demo", "risky", SpanKind::Internal, "demo.{symbol}", PanickingHandler);
        point.enable();
        let result: Result<i64, String> =
            point.call_sync(&provider, CallInfo::new(), |v: &i64| HostValue::Int(*v), || Ok(7));
        assert_eq!(result.unwrap(), 7);
        provider.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn async_wrap_preserves_context_across_await() {
        let provider = test_provider();
        let point = WrapPoint::new("demo", "fetch", SpanKind::Client, "demo.{symbol}", EchoHandler);
        point.enable();
        let result: Result<i64, String> = point
            .call_async(
                &provider,
                CallInfo::new(),
                |v: &i64| HostValue::Int(*v),
                || async {
                    tokio::task::yield_now().await;
                    Ok(99)
                },
            )
            .await;
        assert_eq!(result.unwrap(), 99);
        provider.shutdown(std::time::Duration::from_secs(1)).await;
    }
}
