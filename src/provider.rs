//! Span processors and the process-wide provider (C4, §4.4, §4.6).
//!
//! The teacher wires a single `SdkTracerProvider` with one batch processor
//! in `setup_telemetry_machinery`. We need two independent consumers of the
//! same span stream -- a live, low-latency "in-flight" view and a durable
//! batch exporter -- so this module keeps the teacher's "build once at
//! startup, hand out a handle" shape but splits the processing chain into
//! [`LiveProcessor`] and [`BatchProcessor`], both feeding off
//! [`crate::diagnostics::Counters`] the way the teacher's provider feeds off
//! its single exporter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opentelemetry::trace::SpanId;
use opentelemetry_sdk::Resource as SdkResource;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::attributes::AttrValue;
use crate::diagnostics::Counters;
use crate::exporter::Exporter;
use crate::span::Span;

const LIVE_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_MAX_SPANS: usize = 512;
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const QUEUE_CAPACITY: usize = 2048;

/// Tracks spans that are currently open so [`crate::session::diagnose`] can
/// report `active_traces`/`active_spans`, and periodically exports a
/// snapshot of them tagged `span.in_flight=true` (§4.4) so a crash mid-span
/// still leaves a dashboard trace of what was running.
pub struct LiveProcessor {
    in_flight: Arc<DashMap<SpanId, Span>>,
}

impl LiveProcessor {
    pub fn new() -> Self {
        LiveProcessor {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn on_start(&self, span: Span) {
        self.in_flight.insert(span.span_id, span);
    }

    pub fn on_update(&self, span: &Span) {
        if let Some(mut slot) = self.in_flight.get_mut(&span.span_id) {
            *slot = span.clone();
        }
    }

    pub fn on_end(&self, span_id: SpanId) {
        self.in_flight.remove(&span_id);
    }

    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Spawn the periodic snapshot-export task. Returns a handle the
    /// provider keeps so shutdown can abort it cleanly.
    pub fn spawn_snapshot_task(
        &self,
        resource: SdkResource,
        exporter: Arc<dyn Exporter>,
    ) -> tokio::task::JoinHandle<()> {
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIVE_SNAPSHOT_INTERVAL);
            loop {
                interval.tick().await;
                if in_flight.is_empty() {
                    continue;
                }
                let snapshot: Vec<Span> = in_flight
                    .iter()
                    .map(|entry| {
                        let mut span = entry.value().clone();
                        span.attributes
                            .insert(crate::semconv::meta::SPAN_IN_FLIGHT.to_string(), AttrValue::Bool(true));
                        span
                    })
                    .collect();
                exporter.export(&resource, &snapshot).await;
            }
        })
    }
}

impl Default for LiveProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded FIFO queue of ended spans shared between [`BatchProcessor`]'s
/// worker and any [`ProviderHandle`] that enqueues directly. `try_send`-style
/// channels can only ever drop the item being pushed; dropping the *oldest*
/// entry instead (§4.4, §8) needs something that can evict the head, hence a
/// plain `Mutex`-guarded `VecDeque` woken by a [`Notify`] rather than an
/// `mpsc` channel.
struct SpanQueue {
    items: Mutex<VecDeque<Span>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SpanQueue {
    fn new() -> Self {
        SpanQueue {
            items: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push `span`, evicting the oldest entry first if the queue is already
    /// at capacity. A no-op (counted) once the queue has been closed.
    fn push(&self, span: Span, counters: &Counters) {
        if self.closed.load(Ordering::Acquire) {
            counters.record_queue_dropped(1);
            return;
        }
        let should_notify = {
            let mut items = self.items.lock();
            if items.len() >= QUEUE_CAPACITY {
                items.pop_front();
                counters.record_queue_dropped(1);
            }
            items.push_back(span);
            items.len() >= BATCH_MAX_SPANS
        };
        if should_notify {
            self.notify.notify_one();
        }
    }

    fn drain_batch(&self) -> Vec<Span> {
        let mut items = self.items.lock();
        let n = items.len().min(BATCH_MAX_SPANS);
        items.drain(..n).collect()
    }

    fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

async fn drain_and_flush(exporter: &Arc<dyn Exporter>, resource: &SdkResource, queue: &SpanQueue) {
    loop {
        let batch = queue.drain_batch();
        if batch.is_empty() {
            break;
        }
        exporter.export(resource, &batch).await;
    }
}

/// Drains [`SpanQueue`] in batches of up to [`BATCH_MAX_SPANS`] or every
/// [`BATCH_FLUSH_INTERVAL`], whichever comes first (§4.4). Producers
/// (`BatchProcessor::enqueue` and [`ProviderHandle::on_span_end`]) never
/// block on a full queue -- they drop the oldest entry to make room instead.
pub struct BatchProcessor {
    queue: Arc<SpanQueue>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    counters: Counters,
}

impl BatchProcessor {
    pub fn start(resource: SdkResource, exporter: Arc<dyn Exporter>, counters: Counters) -> Self {
        let queue = Arc::new(SpanQueue::new());
        let worker_queue = Arc::clone(&queue);
        let worker = tokio::spawn(async move {
            let mut flush_tick = tokio::time::interval(BATCH_FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = worker_queue.notify.notified() => {}
                    _ = flush_tick.tick() => {}
                }
                drain_and_flush(&exporter, &resource, &worker_queue).await;
                if worker_queue.closed.load(Ordering::Acquire) {
                    // catch anything pushed in the gap between the closed
                    // check above and this task last waking up.
                    drain_and_flush(&exporter, &resource, &worker_queue).await;
                    break;
                }
            }
        });

        BatchProcessor {
            queue,
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// Enqueue an ended span. Never blocks: a full queue drops the oldest
    /// queued span to make room rather than back-pressuring the caller or
    /// dropping the span that just arrived (§4.4). A no-op once the
    /// processor has been shut down.
    pub fn enqueue(&self, span: Span) {
        self.queue.push(span, &self.counters);
    }

    /// Close the queue and wait (up to `deadline`) for the worker to drain
    /// what's left (§4.3 shutdown, §8). Idempotent: a second call finds
    /// nothing left to do.
    pub async fn shutdown(&self, deadline: Duration) {
        self.queue.close();
        if let Some(worker) = self.worker.lock().take() {
            let _ = tokio::time::timeout(deadline, worker).await;
        }
    }

    fn shared_queue(&self) -> Arc<SpanQueue> {
        Arc::clone(&self.queue)
    }
}

/// Owns the resource, both processors, and the exporter for one SDK
/// instance. The teacher's `setup_telemetry_machinery` returns a single
/// `SdkTracerProvider`; this is the equivalent seam here, constructed once
/// by [`crate::session::init`] and torn down by [`crate::session::shutdown`].
pub struct Provider {
    pub resource: SdkResource,
    pub live: Arc<LiveProcessor>,
    pub batch: BatchProcessor,
    pub counters: Counters,
    snapshot_task: tokio::task::JoinHandle<()>,
}

impl Provider {
    pub fn start(resource: SdkResource, exporter: Arc<dyn Exporter>, counters: Counters) -> Self {
        let live = Arc::new(LiveProcessor::new());
        let snapshot_task = live.spawn_snapshot_task(resource.clone(), Arc::clone(&exporter));
        let batch = BatchProcessor::start(resource.clone(), exporter, counters.clone());
        Provider {
            resource,
            live,
            batch,
            counters,
            snapshot_task,
        }
    }

    pub fn on_span_start(&self, span: Span) {
        self.live.on_start(span);
    }

    pub fn on_span_update(&self, span: &Span) {
        self.live.on_update(span);
    }

    pub fn on_span_end(&self, span: Span) {
        self.live.on_end(span.span_id);
        self.counters.record_span_ended();
        self.batch.enqueue(span);
    }

    /// Idempotent: safe to call more than once (e.g. once explicitly during
    /// controller shutdown and once more if the `Provider` is later dropped).
    pub async fn shutdown(&self, deadline: Duration) {
        self.snapshot_task.abort();
        self.batch.shutdown(deadline).await;
    }

    /// A cheaply-cloneable handle for code (like the stream adapter) that
    /// needs to report span lifecycle events from contexts -- including
    /// `Drop` impls -- that can't hold a borrow of the `Provider` itself.
    pub fn handle(&self) -> ProviderHandle {
        ProviderHandle {
            live: Arc::clone(&self.live),
            queue: self.batch.shared_queue(),
            counters: self.counters.clone(),
        }
    }
}

/// See [`Provider::handle`].
#[derive(Clone)]
pub struct ProviderHandle {
    live: Arc<LiveProcessor>,
    queue: Arc<SpanQueue>,
    counters: Counters,
}

impl ProviderHandle {
    pub fn on_span_start(&self, span: Span) {
        self.live.on_start(span);
    }

    pub fn on_span_end(&self, span: Span) {
        self.live.on_end(span.span_id);
        self.counters.record_span_ended();
        self.queue.push(span, &self.counters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exporter::StubExporter;
    use crate::span::{SpanKind, SpanStatus};
    use opentelemetry::trace::TraceId;

    fn ended_span(byte: u8) -> Span {
        let mut span = Span::new_root(
            "op",
            SpanKind::Internal,
            TraceId::from_bytes([byte; 16]),
            SpanId::from_bytes([byte; 8]),
        );
        span.end(SpanStatus::Ok);
        span
    }

    /// Like `ended_span`, but tagged with a sequence number so a test can
    /// tell which of many spans with colliding trace-id bytes survived.
    fn indexed_span(i: usize) -> Span {
        let mut span = Span::new_root(
            "op",
            SpanKind::Internal,
            TraceId::from_bytes((i as u128).to_be_bytes()),
            SpanId::from_bytes((i as u64).to_be_bytes()),
        );
        span.attributes.insert("seq".to_string(), AttrValue::Int(i as i64));
        span.end(SpanStatus::Ok);
        span
    }

    #[tokio::test]
    async fn ended_spans_are_removed_from_the_live_view_and_reach_the_exporter() {
        let resource = crate::resource::build(&Config::from_env());
        let exporter = Arc::new(StubExporter::new());
        let counters = Counters::new();
        let provider = Provider::start(resource, exporter.clone(), counters.clone());

        let span = ended_span(1);
        provider.on_span_start(span.clone());
        assert_eq!(provider.live.active_count(), 1);
        provider.on_span_end(span);
        assert_eq!(provider.live.active_count(), 0);

        provider.shutdown(Duration::from_secs(1)).await;
        assert_eq!(exporter.all_spans().len(), 1);
        assert_eq!(counters.snapshot().spans_ended, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let resource = crate::resource::build(&Config::from_env());
        let exporter = Arc::new(StubExporter::new());
        let counters = Counters::new();
        let batch = BatchProcessor::start(resource, exporter.clone(), counters.clone());

        // Pushed synchronously on this task, so none of this reaches the
        // worker (spawned on the same current-thread runtime) until we
        // `.await` below -- every eviction below happens on the producer
        // side, exactly what's under test.
        let total = QUEUE_CAPACITY + 5;
        for i in 0..total {
            batch.enqueue(indexed_span(i));
        }
        batch.shutdown(Duration::from_secs(1)).await;

        assert_eq!(counters.snapshot().queue_dropped, 5);
        let seqs: Vec<i64> = exporter
            .all_spans()
            .iter()
            .filter_map(|s| match s.attributes.get("seq") {
                Some(AttrValue::Int(n)) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(seqs.len(), QUEUE_CAPACITY);
        // the oldest 5 (indices 0..5) were evicted to make room; everything
        // from index 5 onward, including the very last one pushed, survived.
        assert_eq!(seqs.iter().min().copied(), Some(5));
        assert!(!seqs.contains(&0));
        assert!(seqs.contains(&(total as i64 - 1)));
    }
}
