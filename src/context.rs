//! Trace context propagation (§5).
//!
//! A small per-logical-thread structure holding the active (trace id, span
//! id, baggage). Wrappers read it for parent linkage and install a new one
//! for the duration of their span. Modeled after `tracing::Instrument`:
//! crossing a suspension point is handled by wrapping the awaited future so
//! that the context is (re-)installed on every `poll`, rather than relying
//! on a runtime-specific task-local.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use opentelemetry::trace::{SpanId, TraceId};

thread_local! {
    static CURRENT: RefCell<Option<TraceContext>> = const { RefCell::new(None) };
}

/// The ambient (trace id, active span id, baggage) used to parent new spans
/// automatically (§3 "Trace context").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub baggage: BTreeMap<String, String>,
}

impl TraceContext {
    pub fn root(trace_id: TraceId, span_id: SpanId) -> Self {
        TraceContext {
            trace_id,
            span_id,
            baggage: BTreeMap::new(),
        }
    }

    pub fn child(&self, span_id: SpanId) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id,
            baggage: self.baggage.clone(),
        }
    }
}

/// The context active on the calling thread right now, if any.
pub fn current() -> Option<TraceContext> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Install `ctx` as current for as long as the returned guard lives,
/// restoring whatever was current before on drop.
#[must_use]
pub fn enter(ctx: TraceContext) -> ContextGuard {
    let prior = CURRENT.with(|cell| cell.borrow_mut().replace(ctx));
    ContextGuard { prior }
}

pub struct ContextGuard {
    prior: Option<TraceContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = self.prior.take());
    }
}

/// Wrap `fut` so that `ctx` is installed as current on every poll. This is
/// the `with_context` helper named in §5 for user-spawned tasks; the wrap
/// engine uses the same adapter internally for wrapped async callables.
pub fn with_context<F>(ctx: TraceContext, fut: F) -> WithContext<F> {
    WithContext { inner: fut, ctx: Some(ctx) }
}

pub struct WithContext<F> {
    inner: F,
    ctx: Option<TraceContext>,
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        // SAFETY: standard pin-projection for a struct whose only
        // structurally-pinned field is `inner`; `ctx` is never pinned.
        let this = unsafe { self.get_unchecked_mut() };
        let ctx = this
            .ctx
            .clone()
            .expect("WithContext polled after completion");
        let _guard = enter(ctx);
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        inner.poll(task_cx)
    }
}

/// Convenience extension mirroring `tracing::Instrument`.
pub trait FutureExt: Future + Sized {
    fn with_trace_context(self, ctx: TraceContext) -> WithContext<Self> {
        with_context(ctx, self)
    }
}
impl<F: Future> FutureExt for F {}
