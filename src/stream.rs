//! Streaming-response span adapter (C6, §4.6).
//!
//! A wrapped call that returns a lazy sequence of chunks (a streamed LLM
//! completion) hands the open span off to one of these adapters instead of
//! ending it immediately: the span stays open until the stream is
//! exhausted, errors, or is abandoned, recording time-to-first-token and
//! accumulated content along the way.
//!
//! §4.6 describes abandonment in terms of garbage collection ("sequence
//! garbage-collected without exhaustion... end the span within a finite
//! delay"), which describes a GC'd host language. Rust has deterministic
//! `Drop` instead, so an adapter dropped before exhaustion ends its span
//! immediately with `stream.abandoned=true` -- trivially "within" any
//! configured delay, and simpler than scheduling a timer against something
//! we already know happened.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use futures::Stream;

use crate::attributes::{encode_pairs, AttrValue, HostValue};
use crate::provider::ProviderHandle;
use crate::semconv;
use crate::span::{Span, SpanStatus};

/// Per-chunk extraction logic supplied by an instrumentor: turn one chunk
/// into an optional content fragment (accumulated across the stream) plus
/// any attribute pairs that should land on the chunk event. Pairs are raw,
/// unencoded values -- [`StreamState`] runs them through
/// [`crate::attributes::Encoder`] before merging, the same as
/// [`crate::wrap::Handler`].
pub trait ChunkHandler<T>: Send + Sync {
    fn extract_content(&self, chunk: &T) -> Option<String>;
    /// Attribute pairs to merge once the stream finishes successfully, given
    /// the fully accumulated content.
    fn on_finish(&self, accumulated: &str, chunk_count: usize) -> Vec<(String, HostValue)> {
        let _ = (accumulated, chunk_count);
        Vec::new()
    }
    fn on_error(&self, error: &str, accumulated: &str, chunk_count: usize) -> Vec<(String, HostValue)> {
        let _ = (error, accumulated, chunk_count);
        Vec::new()
    }
}

/// Caps the accumulated content buffer at the same size used for a single
/// string attribute (§4.2 rule 1) so a very long stream can't grow it
/// unbounded before the span closes.
const ACCUMULATOR_CAP: usize = crate::attributes::DEFAULT_STRING_CAP;

struct StreamState {
    span: Option<Span>,
    provider: ProviderHandle,
    start: Instant,
    first_item_recorded: bool,
    accumulated: String,
    chunk_count: usize,
}

impl StreamState {
    fn record_item(&mut self, content: Option<String>) {
        if !self.first_item_recorded {
            self.first_item_recorded = true;
            let ttft_ms = self.start.elapsed().as_millis() as i64;
            if let Some(span) = &mut self.span {
                span.attributes
                    .insert(semconv::llm_response::TIME_TO_FIRST_TOKEN_MS.to_string(), AttrValue::Int(ttft_ms));
            }
        }
        self.chunk_count += 1;
        if let Some(content) = content {
            if self.accumulated.len() < ACCUMULATOR_CAP {
                self.accumulated.push_str(&content);
            }
        }
    }

    fn finish_ok(&mut self, extra: Vec<(String, HostValue)>) {
        let Some(mut span) = self.span.take() else { return };
        span.merge_attributes(encode_pairs(extra));
        span.attributes.insert(
            semconv::llm_response::CHUNK_COUNT.to_string(),
            AttrValue::Int(self.chunk_count as i64),
        );
        if !self.accumulated.is_empty() {
            span.attributes.insert(
                semconv::llm_response::completion_content(0),
                AttrValue::Str(self.accumulated.clone()),
            );
        }
        span.end(SpanStatus::Ok);
        self.provider.on_span_end(span);
    }

    fn finish_error(&mut self, message: String, extra: Vec<(String, HostValue)>) {
        let Some(mut span) = self.span.take() else { return };
        span.merge_attributes(encode_pairs(extra));
        span.attributes.insert(
            semconv::llm_response::CHUNK_COUNT.to_string(),
            AttrValue::Int(self.chunk_count as i64),
        );
        span.end(SpanStatus::Error { message: Some(message) });
        self.provider.on_span_end(span);
    }

    fn finish_abandoned(&mut self) {
        let Some(mut span) = self.span.take() else { return };
        span.attributes
            .insert(semconv::meta::STREAM_ABANDONED.to_string(), AttrValue::Bool(true));
        span.attributes.insert(
            semconv::llm_response::CHUNK_COUNT.to_string(),
            AttrValue::Int(self.chunk_count as i64),
        );
        span.end(SpanStatus::Unset);
        self.provider.on_span_end(span);
    }
}

/// Wraps a pull-synchronous iterator of `Result<T, E>` chunks.
pub struct SpanIterStream<I, H, T, E> {
    inner: I,
    handler: H,
    state: StreamState,
    _marker: std::marker::PhantomData<(T, E)>,
}

impl<I, H, T, E> SpanIterStream<I, H, T, E>
where
    I: Iterator<Item = Result<T, E>>,
    H: ChunkHandler<T>,
    E: std::fmt::Display,
{
    pub fn new(inner: I, handler: H, span: Span, provider: ProviderHandle) -> Self {
        SpanIterStream {
            inner,
            handler,
            state: StreamState {
                span: Some(span),
                provider,
                start: Instant::now(),
                first_item_recorded: false,
                accumulated: String::new(),
                chunk_count: 0,
            },
            _marker: std::marker::PhantomData,
        }
    }
}

impl<I, H, T, E> Iterator for SpanIterStream<I, H, T, E>
where
    I: Iterator<Item = Result<T, E>>,
    H: ChunkHandler<T>,
    E: std::fmt::Display,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            None => {
                self.state.finish_ok(self.handler.on_finish(&self.state.accumulated, self.state.chunk_count));
                None
            }
            Some(Ok(item)) => {
                let content = self.handler.extract_content(&item);
                self.state.record_item(content);
                Some(Ok(item))
            }
            Some(Err(err)) => {
                let message = err.to_string();
                let extra = self.handler.on_error(&message, &self.state.accumulated, self.state.chunk_count);
                self.state.finish_error(message, extra);
                Some(Err(err))
            }
        }
    }
}

impl<I, H, T, E> Drop for SpanIterStream<I, H, T, E> {
    fn drop(&mut self) {
        self.state.finish_abandoned();
    }
}

/// Wraps a `futures::Stream` of `Result<T, E>` chunks, the async-iteration
/// equivalent of [`SpanIterStream`].
pub struct SpanAsyncStream<S, H, T, E> {
    inner: S,
    handler: H,
    state: StreamState,
    _marker: std::marker::PhantomData<(T, E)>,
}

impl<S, H, T, E> SpanAsyncStream<S, H, T, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    H: ChunkHandler<T>,
    E: std::fmt::Display,
{
    pub fn new(inner: S, handler: H, span: Span, provider: ProviderHandle) -> Self {
        SpanAsyncStream {
            inner,
            handler,
            state: StreamState {
                span: Some(span),
                provider,
                start: Instant::now(),
                first_item_recorded: false,
                accumulated: String::new(),
                chunk_count: 0,
            },
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S, H, T, E> Stream for SpanAsyncStream<S, H, T, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    H: ChunkHandler<T> + Unpin,
    T: Unpin,
    E: std::fmt::Display + Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.state
                    .finish_ok(this.handler.on_finish(&this.state.accumulated, this.state.chunk_count));
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(item))) => {
                let content = this.handler.extract_content(&item);
                this.state.record_item(content);
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(err))) => {
                let message = err.to_string();
                let extra = this.handler.on_error(&message, &this.state.accumulated, this.state.chunk_count);
                this.state.finish_error(message, extra);
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl<S, H, T, E> Drop for SpanAsyncStream<S, H, T, E> {
    fn drop(&mut self) {
        self.state.finish_abandoned();
    }
}

/// Converts a chunk's content fragment into a [`HostValue`] string, the
/// shape instrumentors typically need for non-content chunk attributes.
pub fn content_host_value(content: &str) -> HostValue {
    HostValue::Str(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::diagnostics::Counters;
    use crate::exporter::StubExporter;
    use crate::provider::Provider;
    use crate::span::{SpanKind, SpanStatus as Status};
    use opentelemetry::trace::{SpanId, TraceId};
    use std::sync::Arc;

    struct JoinHandler;
    impl ChunkHandler<String> for JoinHandler {
        fn extract_content(&self, chunk: &String) -> Option<String> {
            Some(chunk.clone())
        }
    }

    fn test_provider() -> (Provider, Arc<StubExporter>) {
        let resource = crate::resource::build(&Config::from_env());
        let exporter = Arc::new(StubExporter::new());
        (Provider::start(resource, exporter.clone(), Counters::new()), exporter)
    }

    fn root_span() -> Span {
        Span::new_root("completion", SpanKind::Client, TraceId::from_bytes([5; 16]), SpanId::from_bytes([5; 8]))
    }

    #[tokio::test]
    async fn exhausted_stream_aggregates_content_and_counts_chunks() {
        let (provider, exporter) = test_provider();
        let handle = provider.handle();
        let items: Vec<Result<String, String>> = vec![Ok("a".into()), Ok("b".into()), Ok("c".into())];
        let stream = SpanIterStream::new(items.into_iter(), JoinHandler, root_span(), handle);
        let collected: Vec<_> = stream.collect();
        assert_eq!(collected.len(), 3);

        provider.shutdown(std::time::Duration::from_secs(1)).await;
        let spans = exporter.all_spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(
            span.attributes.get(semconv::llm_response::CHUNK_COUNT),
            Some(&AttrValue::Int(3))
        );
        assert_eq!(
            span.attributes.get(&semconv::llm_response::completion_content(0)),
            Some(&AttrValue::Str("abc".into()))
        );
        assert!(span.attributes.contains_key(semconv::llm_response::TIME_TO_FIRST_TOKEN_MS));
    }

    #[tokio::test]
    async fn empty_stream_has_no_ttft_attribute() {
        let (provider, exporter) = test_provider();
        let handle = provider.handle();
        let items: Vec<Result<String, String>> = vec![];
        let stream = SpanIterStream::new(items.into_iter(), JoinHandler, root_span(), handle);
        let _: Vec<_> = stream.collect();

        provider.shutdown(std::time::Duration::from_secs(1)).await;
        let spans = exporter.all_spans();
        let span = &spans[0];
        assert_eq!(span.attributes.get(semconv::llm_response::CHUNK_COUNT), Some(&AttrValue::Int(0)));
        assert!(!span.attributes.contains_key(semconv::llm_response::TIME_TO_FIRST_TOKEN_MS));
    }

    #[tokio::test]
    async fn dropping_before_exhaustion_marks_span_abandoned() {
        let (provider, exporter) = test_provider();
        let handle = provider.handle();
        let items: Vec<Result<String, String>> = vec![Ok("a".into()), Ok("b".into())];
        let stream = SpanIterStream::new(items.into_iter(), JoinHandler, root_span(), handle);
        drop(stream); // never iterated: abandoned before first item.

        provider.shutdown(std::time::Duration::from_secs(1)).await;
        let spans = exporter.all_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::Unset);
        assert_eq!(
            spans[0].attributes.get(semconv::meta::STREAM_ABANDONED),
            Some(&AttrValue::Bool(true))
        );
    }
}
