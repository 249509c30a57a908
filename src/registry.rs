//! Instrumentor registry (C7, §4.7).
//!
//! One entry per host library an instrumentor knows how to wrap. A dynamic
//! language detects a library by trying to import it; a compiled Rust
//! process doesn't have "maybe it's installed" the same way, so detection
//! here is a predicate the instrumentor author supplies (reading an env
//! var, probing a feature flag, asking the embedder for a reported host
//! version) — the state machine and activation/deactivation semantics of
//! §4.7 carry over unchanged.
//!
//! Grounded on the pack's DashMap-backed registry/processor pattern
//! (concurrent state keyed by name, `parking_lot`/`dashmap` rather than a
//! single global `Mutex<HashMap<..>>`).

use dashmap::DashMap;
use tracing::{info, warn};

use crate::wrap::WireableWrap;

/// Per-descriptor lifecycle state (§4.7's state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentorState {
    Absent,
    Detected,
    Active,
    Deactivated,
    /// Terminal for the life of the process: the host library is present
    /// but its version doesn't satisfy the descriptor's predicate.
    VersionMismatch,
}

/// What `detect` found.
pub enum DetectOutcome {
    Absent,
    Present { version: String },
}

/// Everything the registry needs to drive one host library's instrumentor
/// through its lifecycle.
pub struct InstrumentorDescriptor {
    pub name: &'static str,
    pub detect: Box<dyn Fn() -> DetectOutcome + Send + Sync>,
    pub version_satisfies: Box<dyn Fn(&str) -> bool + Send + Sync>,
    /// Wraps applied in this order on activation, reversed on deactivation.
    pub wraps: Vec<std::sync::Arc<dyn WireableWrap>>,
}

struct Entry {
    descriptor: InstrumentorDescriptor,
    state: InstrumentorState,
    /// (module, symbol) pairs of wraps actually enabled during the most
    /// recent activation, so `deactivate` only reverses those (§4.7: a
    /// symbol rewrapped by someone else since is left alone -- modeled
    /// here as "only ever touch wraps this registry itself enabled").
    applied: Vec<usize>,
}

/// Tracks every known instrumentor by name. Constructed once per SDK
/// instance; shared via the session controller.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<&'static str, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: InstrumentorDescriptor) {
        let name = descriptor.name;
        self.entries.insert(
            name,
            Entry {
                descriptor,
                state: InstrumentorState::Absent,
                applied: Vec::new(),
            },
        );
    }

    pub fn state(&self, name: &str) -> Option<InstrumentorState> {
        self.entries.get(name).map(|e| e.state)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.descriptor.name).collect()
    }

    /// Run `detect` for every registered descriptor, transitioning
    /// `absent -> detected` or `absent -> version_mismatch` (§4.7).
    pub fn detect_all(&self) {
        for mut entry in self.entries.iter_mut() {
            let descriptor = &entry.descriptor;
            match (descriptor.detect)() {
                DetectOutcome::Absent => {
                    entry.state = InstrumentorState::Absent;
                }
                DetectOutcome::Present { version } => {
                    if (descriptor.version_satisfies)(&version) {
                        entry.state = InstrumentorState::Detected;
                    } else {
                        let err = crate::error::InstrumentorError::VersionMismatch(descriptor.name.to_string());
                        info!(instrumentor = descriptor.name, version, error = %err, "instrumentor stays inactive");
                        entry.state = InstrumentorState::VersionMismatch;
                    }
                }
            }
        }
    }

    /// Apply every wrap in the named descriptor, in declared order.
    /// Individual wrap failures don't abort the rest of the list; the
    /// descriptor becomes `active` if at least one wrap was enabled
    /// (§4.7). Our wraps can't actually fail to enable (there's no dynamic
    /// symbol resolution to fail), so this loop exists primarily to keep
    /// the activation contract identical to a host where it can.
    pub fn activate(&self, name: &str) {
        let Some(mut entry) = self.entries.get_mut(name) else {
            let err = crate::error::InstrumentorError::NotDetected(name.to_string());
            warn!(instrumentor = name, error = %err, "activate called for an unregistered instrumentor");
            return;
        };
        if entry.state != InstrumentorState::Detected && entry.state != InstrumentorState::Deactivated {
            warn!(instrumentor = name, state = ?entry.state, "activate called from an invalid state; ignoring");
            return;
        }

        let mut applied = Vec::new();
        for (index, wrap) in entry.descriptor.wraps.iter().enumerate() {
            if wrap.is_enabled() {
                // idempotence (§4.5): already-active wrap, log and skip.
                warn!(instrumentor = name, module = wrap.module(), symbol = wrap.symbol(), "wrap already active; skipping");
                continue;
            }
            wrap.enable();
            applied.push(index);
        }

        if applied.is_empty() {
            let err = crate::error::InstrumentorError::WrapFailed {
                module: entry.descriptor.name.to_string(),
                symbol: String::new(),
                reason: "no wraps could be enabled".to_string(),
            };
            warn!(instrumentor = name, error = %err, "instrumentor remains inactive");
            return;
        }
        entry.applied = applied;
        entry.state = InstrumentorState::Active;
        info!(instrumentor = name, count = entry.applied.len(), "instrumentor activated");
    }

    /// Reverse every wrap this registry enabled for `name`.
    pub fn deactivate(&self, name: &str) {
        let Some(mut entry) = self.entries.get_mut(name) else {
            return;
        };
        for &index in &entry.applied {
            if let Some(wrap) = entry.descriptor.wraps.get(index) {
                wrap.disable();
            }
        }
        entry.applied.clear();
        entry.state = InstrumentorState::Deactivated;
        info!(instrumentor = name, "instrumentor deactivated");
    }

    /// Deactivate every currently-active instrumentor, e.g. during shutdown.
    pub fn deactivate_all(&self) {
        let names: Vec<&'static str> = self
            .entries
            .iter()
            .filter(|e| e.state == InstrumentorState::Active)
            .map(|e| e.descriptor.name)
            .collect();
        for name in names {
            self.deactivate(name);
        }
    }
}
