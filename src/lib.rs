//! agentops: a process-embedded observability SDK for generative-AI and
//! agent frameworks (§1-§2).
//!
//! Auto-instruments third-party clients via [`registry::Registry`] and
//! [`wrap::WrapPoint`], captures their runtime behavior as hierarchical
//! OTel-shaped spans ([`span::Span`]), enriches them with AI-specific
//! attributes ([`semconv`], [`attributes`]), and exports them over OTLP/HTTP
//! ([`exporter`]). [`session::Session`] owns one fully wired instance; this
//! module holds the process-wide singleton the free functions below
//! delegate to, mirroring the teacher's single `main` that builds one
//! `SdkTracerProvider` for the life of the process.

pub mod attributes;
pub mod auth;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod encode_otlp;
pub mod error;
pub mod exporter;
pub mod instrumentors;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod semconv;
pub mod session;
pub mod span;
pub mod stream;
pub mod wrap;

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;

pub use config::{Config, InitOptions, LogLevel};
pub use diagnostics::{CountersSnapshot, DiagnosticReport};
pub use session::{ControllerState, Session, TraceGuard, TraceHandle};
pub use span::{SpanKind, SpanStatus};

static SESSION: OnceLock<Mutex<Option<Arc<Session>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<Session>>> {
    SESSION.get_or_init(|| Mutex::new(None))
}

/// Initialize the process-wide SDK instance (§4.8).
///
/// Idempotent: a second call with the same `api_key` as the live session is
/// a no-op that returns the existing session. A second call with a
/// *different* `api_key` logs a warning and reconfigures -- the old session
/// is shut down synchronously-from-the-caller's-perspective is not possible
/// here (shutdown is async), so the old instance is torn down on a detached
/// task while the new one takes over immediately.
pub fn init(options: InitOptions) -> Arc<Session> {
    let mut config = Config::from_env();
    config.merge(options);

    let mut guard = slot().lock();
    if let Some(existing) = guard.as_ref() {
        if existing.config().api_key == config.api_key {
            return Arc::clone(existing);
        }
        warn!("agentops::init called again with a different api_key; reconfiguring");
        let stale = Arc::clone(existing);
        tokio::spawn(async move {
            stale.shutdown(stale.config().shutdown_timeout).await;
        });
    }

    let session = Session::init(config);
    *guard = Some(Arc::clone(&session));
    session
}

/// The active session, if [`init`] has been called and [`shutdown`] hasn't
/// completed since.
pub fn current() -> Option<Arc<Session>> {
    slot().lock().clone()
}

fn active_session() -> Arc<Session> {
    current().expect("agentops::init must be called before using the SDK")
}

/// Start a new root span ("trace"). Panics if the SDK hasn't been
/// initialized -- see [`init`].
pub fn start_trace(name: impl Into<String>, tags: std::collections::HashMap<String, String>) -> TraceHandle {
    active_session().start_trace(name, tags)
}

/// End a trace started with [`start_trace`].
pub fn end_trace(handle: TraceHandle, status: SpanStatus) {
    active_session().end_trace(handle, status);
}

/// RAII form of [`start_trace`]/[`end_trace`].
pub fn start_trace_guarded(name: impl Into<String>, tags: std::collections::HashMap<String, String>) -> TraceGuard {
    active_session().start_trace_guarded(name, tags)
}

/// Current controller state, or [`ControllerState::Uninit`] if [`init`] has
/// never been called.
pub fn controller_state() -> ControllerState {
    match current() {
        Some(session) => session.controller_state(),
        None => ControllerState::Uninit,
    }
}

/// Snapshot of export counters, auth status, and open-trace count (§7).
pub fn diagnose() -> DiagnosticReport {
    match current() {
        Some(session) => session.diagnose(),
        None => DiagnosticReport {
            initialized: false,
            degraded: false,
            authenticated: false,
            active_traces: 0,
            counters: diagnostics::CountersSnapshot::default(),
        },
    }
}

/// Flush and tear down the process-wide session (§4.8). A no-op if [`init`]
/// was never called or [`shutdown`] already completed.
pub async fn shutdown(timeout: std::time::Duration) {
    let session = slot().lock().take();
    if let Some(session) = session {
        session.shutdown(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        *slot().lock() = None;
    }

    #[tokio::test]
    async fn init_is_idempotent_for_the_same_api_key() {
        reset();
        let a = init(InitOptions {
            api_key: Some("key-a".into()),
            auto_start_session: Some(false),
            ..Default::default()
        });
        let b = init(InitOptions {
            api_key: Some("key-a".into()),
            auto_start_session: Some(false),
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&a, &b));
        shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn init_with_a_different_api_key_reconfigures() {
        reset();
        let a = init(InitOptions {
            api_key: Some("key-a".into()),
            auto_start_session: Some(false),
            ..Default::default()
        });
        let b = init(InitOptions {
            api_key: Some("key-b".into()),
            auto_start_session: Some(false),
            ..Default::default()
        });
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().api_key, "key-b");
        shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn uninitialized_diagnose_reports_not_initialized() {
        reset();
        let report = diagnose();
        assert!(!report.initialized);
        assert_eq!(controller_state(), ControllerState::Uninit);
    }

    #[tokio::test]
    async fn start_and_end_trace_through_the_free_functions() {
        reset();
        init(InitOptions {
            api_key: Some("key-c".into()),
            auto_start_session: Some(false),
            ..Default::default()
        });
        let handle = start_trace("work", std::collections::HashMap::new());
        assert_eq!(controller_state(), ControllerState::Running);
        end_trace(handle, SpanStatus::Ok);
        shutdown(std::time::Duration::from_secs(1)).await;
        assert_eq!(controller_state(), ControllerState::Uninit);
    }
}
