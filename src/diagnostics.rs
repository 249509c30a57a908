//! Diagnostics (C9, §4.8, §7).
//!
//! The only user-visible signal of trouble besides logs and the absence of
//! data on the dashboard: export success/failure counters, auth status, and
//! a last-error slot, assembled into a [`DiagnosticReport`] by
//! [`crate::session::diagnose`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared, cheaply-cloneable counters updated by the exporter and
/// processors. `Arc`'d once at SDK construction and handed to every
/// component that needs to increment one.
#[derive(Clone, Default)]
pub struct Counters {
    inner: Arc<CountersInner>,
}

#[derive(Default)]
struct CountersInner {
    export_success: AtomicU64,
    export_fail: AtomicU64,
    export_reject: AtomicU64,
    auth_fail: AtomicU64,
    queue_dropped: AtomicU64,
    spans_ended: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_span_ended(&self) {
        self.inner.spans_ended.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_export_success(&self, count: u64) {
        self.inner.export_success.fetch_add(count, Ordering::Relaxed);
    }
    pub fn record_export_fail(&self, count: u64, reason: impl Into<String>) {
        self.inner.export_fail.fetch_add(count, Ordering::Relaxed);
        self.set_last_error(reason);
    }
    pub fn record_export_reject(&self, count: u64, reason: impl Into<String>) {
        self.inner.export_reject.fetch_add(count, Ordering::Relaxed);
        self.set_last_error(reason);
    }
    pub fn record_auth_fail(&self, reason: impl Into<String>) {
        self.inner.auth_fail.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(reason);
    }
    pub fn record_queue_dropped(&self, count: u64) {
        self.inner.queue_dropped.fetch_add(count, Ordering::Relaxed);
    }
    fn set_last_error(&self, reason: impl Into<String>) {
        *self.inner.last_error.lock() = Some(reason.into());
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            export_success: self.inner.export_success.load(Ordering::Relaxed),
            export_fail: self.inner.export_fail.load(Ordering::Relaxed),
            export_reject: self.inner.export_reject.load(Ordering::Relaxed),
            auth_fail: self.inner.auth_fail.load(Ordering::Relaxed),
            queue_dropped: self.inner.queue_dropped.load(Ordering::Relaxed),
            spans_ended: self.inner.spans_ended.load(Ordering::Relaxed),
            last_error: self.inner.last_error.lock().clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CountersSnapshot {
    pub export_success: u64,
    pub export_fail: u64,
    pub export_reject: u64,
    pub auth_fail: u64,
    pub queue_dropped: u64,
    pub spans_ended: u64,
    pub last_error: Option<String>,
}

impl CountersSnapshot {
    /// The §8 quantified invariant: `export_success + export_fail +
    /// export_reject + queue_dropped` equals spans ended in the window,
    /// modulo spans still in the queue awaiting their first export attempt.
    pub fn accounted_for(&self) -> u64 {
        self.export_success + self.export_fail + self.export_reject + self.queue_dropped
    }
}

/// Snapshot returned by [`crate::session::diagnose`].
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub initialized: bool,
    /// `true` once the SDK has decided its configuration is unusable and
    /// downgraded every tracing call to a no-op (§7).
    pub degraded: bool,
    pub authenticated: bool,
    pub active_traces: usize,
    pub counters: CountersSnapshot,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "agentops diagnostic report")?;
        writeln!(f, "  initialized:    {}", self.initialized)?;
        writeln!(f, "  degraded:       {}", self.degraded)?;
        writeln!(f, "  authenticated:  {}", self.authenticated)?;
        writeln!(f, "  active traces:  {}", self.active_traces)?;
        writeln!(f, "  exported:       {}", self.counters.export_success)?;
        writeln!(f, "  export failed:  {}", self.counters.export_fail)?;
        writeln!(f, "  rejected:       {}", self.counters.export_reject)?;
        writeln!(f, "  auth failures:  {}", self.counters.auth_fail)?;
        writeln!(f, "  queue dropped:  {}", self.counters.queue_dropped)?;
        if let Some(err) = &self.counters.last_error {
            writeln!(f, "  last error:     {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_sum_tracks_accounting_invariant() {
        let counters = Counters::new();
        counters.record_span_ended();
        counters.record_span_ended();
        counters.record_export_success(1);
        counters.record_queue_dropped(1);
        let snap = counters.snapshot();
        assert_eq!(snap.accounted_for(), snap.spans_ended);
    }
}
