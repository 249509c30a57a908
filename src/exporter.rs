//! Authenticated OTLP/HTTP exporter (C3, §4.3).
//!
//! The teacher builds its `opentelemetry_sdk::trace::SdkTracerProvider`
//! around `opentelemetry_otlp::SpanExporter` (`setup_telemetry_machinery`
//! in `traces.rs`). We need bearer-token auth, the specific retry/backoff
//! and reject-vs-retry split of §4.3, and never-raise failure semantics
//! that the stock gRPC exporter doesn't give us, so this module hand-rolls
//! the HTTP/protobuf transport with `reqwest` (already the teacher's HTTP
//! client) over `opentelemetry-proto`-encoded bytes (`encode_otlp.rs`),
//! dropping `opentelemetry-otlp` entirely (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_sdk::Resource as SdkResource;
use rand_backoff::jitter;
use tracing::{debug, warn};

use crate::auth::TokenCache;
use crate::diagnostics::Counters;
use crate::encode_otlp;
use crate::span::Span;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

/// Anything that can take a batch of already-ended spans and try to ship
/// them somewhere. Exists so tests (and the stub exporter) can stand in for
/// [`AuthenticatedOtlpExporter`] without a network.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, resource: &SdkResource, spans: &[Span]);
    async fn shutdown(&self, _deadline: Duration) {}
}

/// Minimal jitter helper so we don't need a dedicated backoff crate: ±20%
/// of `base`, clamped to stay positive. Kept in its own tiny module so
/// `exporter.rs` reads as "apply backoff policy", not "roll dice".
mod rand_backoff {
    use std::time::Duration;

    pub fn jitter(base: Duration, seed: u64) -> Duration {
        // Deterministic pseudo-jitter derived from a counter rather than a
        // full RNG dependency: ±20% spread is all §4.3 asks for, and tests
        // benefit from not needing to mock randomness.
        let spread = (seed % 41) as i64 - 20; // -20..=20
        let factor = 1.0 + (spread as f64 / 100.0);
        Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
    }
}

/// Sends batches to the backend's OTLP/HTTP endpoint, authenticating with a
/// bearer token obtained from the API key (§4.3, §6).
pub struct AuthenticatedOtlpExporter {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<TokenCache>,
    counters: Counters,
    attempt_seed: std::sync::atomic::AtomicU64,
}

impl AuthenticatedOtlpExporter {
    pub fn new(client: reqwest::Client, endpoint: String, tokens: Arc<TokenCache>, counters: Counters) -> Self {
        AuthenticatedOtlpExporter {
            client,
            endpoint,
            tokens,
            counters,
            attempt_seed: std::sync::atomic::AtomicU64::new(0),
        }
    }

    async fn post_once(&self, body: &[u8], token: &str) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-protobuf")
            .header("Authorization", format!("Bearer {token}"))
            .body(body.to_vec())
            .send()
            .await?;
        Ok(response.status())
    }

    async fn ensure_token(&self) -> Option<String> {
        if let Some(token) = self.tokens.valid_token() {
            return Some(token);
        }
        match self.tokens.refresh().await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "token refresh failed; spans will accumulate until auth recovers");
                None
            }
        }
    }
}

#[async_trait]
impl Exporter for AuthenticatedOtlpExporter {
    async fn export(&self, resource: &SdkResource, spans: &[Span]) {
        if spans.is_empty() {
            return;
        }
        let count = spans.len() as u64;
        let body = encode_otlp::encode_batch(resource, spans);

        // §4.3: "while unauthenticated, the exporter must not block span
        // production" -- we are already off the production path here (the
        // batch worker calls us), so the only obligation is to not panic
        // or loop forever; falling through to "no token" below does that.
        let Some(mut token) = self.ensure_token().await else {
            self.counters.record_auth_fail("no token available");
            return;
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.post_once(&body, &token).await {
                Ok(status) if status.is_success() => {
                    self.counters.record_export_success(count);
                    return;
                }
                Ok(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                    debug!(%status, "export unauthenticated; refreshing token and retrying once");
                    match self.tokens.refresh().await {
                        Ok(fresh) if attempt == 1 => {
                            token = fresh;
                            continue;
                        }
                        _ => {
                            self.counters.record_auth_fail(format!("auth failure (HTTP {status})"));
                            return;
                        }
                    }
                }
                Ok(status) if status.is_server_error() => {
                    if attempt >= MAX_ATTEMPTS {
                        self.counters
                            .record_export_fail(count, format!("retries exhausted (HTTP {status})"));
                        return;
                    }
                    let seed = self.attempt_seed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let backoff = jitter(
                        (BACKOFF_BASE * BACKOFF_FACTOR.pow(attempt - 1)).min(BACKOFF_CAP),
                        seed,
                    );
                    debug!(%status, attempt, ?backoff, "server error, retrying after backoff");
                    tokio::time::sleep(backoff).await;
                }
                Ok(status) => {
                    // any other 4xx: permanent, non-auth rejection.
                    self.counters.record_export_reject(count, format!("rejected (HTTP {status})"));
                    return;
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        self.counters
                            .record_export_fail(count, format!("network error after retries: {err}"));
                        return;
                    }
                    let seed = self.attempt_seed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let backoff = jitter(
                        (BACKOFF_BASE * BACKOFF_FACTOR.pow(attempt - 1)).min(BACKOFF_CAP),
                        seed,
                    );
                    debug!(error = %err, attempt, ?backoff, "network error, retrying after backoff");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// In-memory exporter used by tests and the stub-exporter pattern named in
/// SPEC_FULL's test-tooling section.
#[derive(Default)]
pub struct StubExporter {
    batches: parking_lot::Mutex<Vec<Vec<Span>>>,
}

impl StubExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Span>> {
        self.batches.lock().clone()
    }

    pub fn all_spans(&self) -> Vec<Span> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Exporter for StubExporter {
    async fn export(&self, _resource: &SdkResource, spans: &[Span]) {
        self.batches.lock().push(spans.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanKind, SpanStatus};
    use opentelemetry::trace::{SpanId, TraceId};

    fn ended_span(name: &str) -> Span {
        let mut span = Span::new_root(name, SpanKind::Internal, TraceId::from_bytes([3; 16]), SpanId::from_bytes([3; 8]));
        span.end(SpanStatus::Ok);
        span
    }

    #[tokio::test]
    async fn stub_exporter_records_batches() {
        let exporter = StubExporter::new();
        let resource = crate::resource::build(&crate::config::Config::from_env());
        exporter.export(&resource, &[ended_span("a"), ended_span("b")]).await;
        assert_eq!(exporter.all_spans().len(), 2);
    }

    #[test]
    fn jitter_stays_within_twenty_percent_and_non_negative() {
        for seed in 0..50 {
            let j = jitter(Duration::from_secs(10), seed);
            assert!(j.as_secs_f64() >= 7.9 && j.as_secs_f64() <= 12.1, "jitter {:?} out of range", j);
        }
    }
}
