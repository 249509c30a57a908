//! Error types for the SDK's internal plumbing.
//!
//! None of these ever reach a wrapped host call (see §7 of the design):
//! they are surfaced only through [`crate::diagnostics`] counters and log
//! events. The `GitHubProblem`-style enum-per-subsystem pattern here is
//! carried over from the teacher's `github.rs`.

use thiserror::Error;

/// Failure attempting to encode a host value into an OTel-permitted
/// attribute shape. Per the attribute encoder contract, this should be rare:
/// almost everything degrades to a string rather than erroring.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("value contains a self-referential structure and cannot be encoded")]
    SelfReferential,
}

/// Failures from the authenticated OTLP exporter's auth/export machinery.
/// Never raised to callers; tracked via [`crate::diagnostics::DiagnosticReport`].
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("transport error contacting {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("auth endpoint returned an unexpected response shape")]
    AuthResponseShape,
    #[error("authentication failed (401/403)")]
    Unauthenticated,
    #[error("backend rejected the batch permanently: {status}")]
    PermanentReject { status: u16 },
    #[error("backend returned a server error after retries: {status}")]
    RetriesExhausted { status: u16 },
}

/// Failure activating or deactivating an instrumentor.
#[derive(Debug, Error)]
pub enum InstrumentorError {
    #[error("host library {0} is not importable/linkable in this process")]
    NotDetected(String),
    #[error("host library {0} version does not satisfy the instrumentor's predicate")]
    VersionMismatch(String),
    #[error("wrap of {module}.{symbol} failed: {reason}")]
    WrapFailed {
        module: String,
        symbol: String,
        reason: String,
    },
}

/// Top-level SDK error, returned only by the handful of operations that are
/// allowed to fail observably (e.g. `init` with a malformed endpoint).
/// Everything downstream of a successful `init` degrades silently per §7.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("missing API key (set AGENTOPS_API_KEY or pass one to init())")]
    MissingApiKey,
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}
