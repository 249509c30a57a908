//! Session / trace controller (C8, §4.8).
//!
//! Owns one fully wired SDK instance: resource, exporter, provider,
//! instrumentor registry, and the set of currently-open root spans
//! ("traces"). [`crate::lib`] holds the process-wide singleton and exposes
//! the free-function API (`agentops::init`, `agentops::start_trace`, ...);
//! this module is the instance those functions delegate to, kept separate
//! so tests can run several independent sessions side by side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opentelemetry::trace::{SpanId, TraceId};
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::attributes::{AttrValue, Attributes};
use crate::config::Config;
use crate::diagnostics::{Counters, DiagnosticReport};
use crate::exporter::{AuthenticatedOtlpExporter, Exporter};
use crate::provider::Provider;
use crate::registry::Registry;
use crate::span::{Span, SpanKind, SpanStatus};

/// The controller's own lifecycle phase (§4.8: `uninit -> ready -> running
/// -> stopping -> stopped`). `ready` vs. `running` is derived from whether
/// any root span is currently open rather than tracked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialized,
    Stopping,
    Stopped,
}

/// Public, derived controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninit,
    Ready,
    Running,
    Stopping,
    Stopped,
}

/// Identifies one root span started via [`Session::start_trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHandle {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// One fully initialized SDK instance.
pub struct Session {
    config: Config,
    provider: Provider,
    registry: Registry,
    open_traces: DashMap<SpanId, Span>,
    phase: Mutex<Phase>,
    tokens: Arc<crate::auth::TokenCache>,
    /// Set when `config` fails validation at construction time (§7:
    /// "SDK initialization failure... SDK transitions to a degraded mode
    /// where all calls are no-ops, never raised"). Never cleared once set.
    degraded: AtomicBool,
}

impl Session {
    /// Build and wire everything: resource, authenticated exporter,
    /// provider (live + batch processors), registry with the built-in demo
    /// instrumentor registered and detect/activate run, and -- if
    /// `config.auto_start_session` -- a root span named `session` carrying
    /// `config.default_tags`.
    pub fn init(config: Config) -> Arc<Session> {
        let degraded = match config.validate() {
            Ok(()) => false,
            Err(err) => {
                error!(error = %err, "SDK initialization failed; entering degraded mode, all tracing calls become no-ops");
                true
            }
        };

        let resource = crate::resource::build(&config);
        let counters = Counters::new();
        let http = reqwest::Client::new();
        let tokens = Arc::new(crate::auth::TokenCache::new(
            http.clone(),
            config.auth_token_url(),
            config.api_key.clone(),
        ));
        let exporter: Arc<dyn Exporter> = Arc::new(AuthenticatedOtlpExporter::new(
            http,
            config.exporter_endpoint.clone(),
            Arc::clone(&tokens),
            counters.clone(),
        ));
        let provider = Provider::start(resource, exporter, counters);

        let registry = Registry::new();
        let demo = crate::instrumentors::demo::DemoInstrumentor::new();
        registry.register(demo.descriptor());
        registry.detect_all();
        registry.activate("demo_client");

        let session = Arc::new(Session {
            config: config.clone(),
            provider,
            registry,
            open_traces: DashMap::new(),
            phase: Mutex::new(Phase::Initialized),
            tokens,
            degraded: AtomicBool::new(degraded),
        });

        if config.auto_start_session && !degraded {
            let handle = session.start_trace("session", config.default_tags.clone());
            info!(trace_id = ?handle.trace_id, "auto-started session root span");
        }

        session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// A cheaply-cloneable handle onto this session's provider, for callers
    /// (like the stream adapter) that need to report span lifecycle events
    /// without holding a borrow of the `Session` itself.
    pub fn handle(&self) -> crate::provider::ProviderHandle {
        self.provider.handle()
    }

    /// `true` once `init` found the configuration unusable (§7). Every
    /// trace operation below becomes a no-op while this holds.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Start a new, independent root span. Concurrent traces never nest:
    /// each gets a fresh trace id (§4.8). A no-op returning an invalid
    /// handle while the session is degraded.
    pub fn start_trace(&self, name: impl Into<String>, tags: HashMap<String, String>) -> TraceHandle {
        if self.is_degraded() {
            return TraceHandle {
                trace_id: TraceId::INVALID,
                span_id: SpanId::INVALID,
            };
        }
        let id_gen = RandomIdGenerator::default();
        let trace_id = id_gen.new_trace_id();
        let span_id = id_gen.new_span_id();
        let mut span = Span::new_root(name, SpanKind::Internal, trace_id, span_id);

        let mut attrs = Attributes::new();
        for (key, value) in tags {
            attrs.insert(format!("custom.{key}"), AttrValue::Str(value));
        }
        span.merge_attributes(attrs);

        self.provider.on_span_start(span.clone());
        self.open_traces.insert(span_id, span);

        TraceHandle { trace_id, span_id }
    }

    /// End the root span `handle` refers to. A no-op (with a logged
    /// warning) if the handle doesn't match an open trace -- e.g. it was
    /// already ended -- and a silent no-op while the session is degraded.
    pub fn end_trace(&self, handle: TraceHandle, status: SpanStatus) {
        if self.is_degraded() {
            return;
        }
        let Some((_, mut span)) = self.open_traces.remove(&handle.span_id) else {
            warn!(trace_id = ?handle.trace_id, "end_trace called for a trace that is not open");
            return;
        };
        span.end(status);
        self.provider.on_span_end(span);
    }

    /// RAII form of `start_trace`/`end_trace`: ends the span `ok` on normal
    /// drop, `error` if the guard is dropped during a panic (the Rust
    /// analogue of "exceptional exit" from §4.8's context-manager form).
    /// The panic itself is never caught here and continues unwinding.
    pub fn start_trace_guarded(self: &Arc<Self>, name: impl Into<String>, tags: HashMap<String, String>) -> TraceGuard {
        let handle = self.start_trace(name, tags);
        TraceGuard {
            session: Arc::clone(self),
            handle,
            armed: true,
        }
    }

    pub fn active_trace_count(&self) -> usize {
        self.open_traces.len()
    }

    pub fn controller_state(&self) -> ControllerState {
        match *self.phase.lock() {
            Phase::Initialized if self.open_traces.is_empty() => ControllerState::Ready,
            Phase::Initialized => ControllerState::Running,
            Phase::Stopping => ControllerState::Stopping,
            Phase::Stopped => ControllerState::Stopped,
        }
    }

    pub fn diagnose(&self) -> DiagnosticReport {
        DiagnosticReport {
            initialized: *self.phase.lock() == Phase::Initialized,
            degraded: self.is_degraded(),
            authenticated: self.tokens.is_authenticated(),
            active_traces: self.active_trace_count(),
            counters: self.provider.counters.snapshot(),
        }
    }

    /// End every still-open root span, deactivate all instrumentors, and
    /// drain the batch queue, up to `timeout` (§4.8).
    pub async fn shutdown(&self, timeout: Duration) {
        *self.phase.lock() = Phase::Stopping;

        let open: Vec<(SpanId, Span)> = self
            .open_traces
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (span_id, mut span) in open {
            self.open_traces.remove(&span_id);
            span.end(SpanStatus::Unset);
            self.provider.on_span_end(span);
        }

        self.registry.deactivate_all();
        self.provider.shutdown(timeout).await;
        *self.phase.lock() = Phase::Stopped;
    }
}

/// See [`Session::start_trace_guarded`].
pub struct TraceGuard {
    session: Arc<Session>,
    handle: TraceHandle,
    armed: bool,
}

impl TraceGuard {
    pub fn handle(&self) -> TraceHandle {
        self.handle
    }

    /// End the trace early with an explicit status, disarming the guard so
    /// `Drop` doesn't end it a second time.
    pub fn end(mut self, status: SpanStatus) {
        self.armed = false;
        self.session.end_trace(self.handle, status);
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let status = if std::thread::panicking() {
            SpanStatus::Error {
                message: Some("trace scope exited via panic".to_string()),
            }
        } else {
            SpanStatus::Ok
        };
        self.session.end_trace(self.handle, status);
    }
}
