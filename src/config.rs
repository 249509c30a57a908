//! Configuration and the environment variables recognized by the SDK (§6).
//!
//! Mirrors the teacher's `Config`/`API` struct in `github.rs`: a plain data
//! struct assembled once at startup, plus a `from_env` constructor. Here it
//! is merged with whatever the embedder passes to [`crate::init`], with
//! programmatic values always taking precedence over the environment.

use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_API_ENDPOINT: &str = "https://api.agentops.ai";

/// Resolved configuration for one SDK instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_endpoint: String,
    pub exporter_endpoint: String,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub auto_start_session: bool,
    pub default_tags: HashMap<String, String>,
    /// Deadline for draining the batch queue on shutdown (§4.3, §8).
    pub shutdown_timeout: Duration,
}

/// Values an embedder can override at `init()` time; anything left `None`
/// falls back to the environment, then to the hard-coded default.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub exporter_endpoint: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub environment: Option<String>,
    pub auto_start_session: Option<bool>,
    pub default_tags: Option<HashMap<String, String>>,
}

impl Config {
    /// Build configuration from environment variables alone, used as the
    /// base layer that `init()` options are then merged onto.
    pub fn from_env() -> Self {
        let api_key = std::env::var("AGENTOPS_API_KEY").unwrap_or_default();
        let api_endpoint =
            std::env::var("AGENTOPS_API_ENDPOINT").unwrap_or_else(|_| DEFAULT_API_ENDPOINT.to_string());
        let exporter_endpoint = std::env::var("AGENTOPS_EXPORTER_ENDPOINT")
            .unwrap_or_else(|_| format!("{}/v1/traces", api_endpoint.trim_end_matches('/')));

        Config {
            api_key,
            api_endpoint,
            exporter_endpoint,
            service_name: "unnamed-agentops-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            auto_start_session: true,
            default_tags: HashMap::new(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Merge programmatic overrides onto this configuration, in place.
    pub fn merge(&mut self, options: InitOptions) {
        if let Some(v) = options.api_key {
            self.api_key = v;
        }
        if let Some(v) = options.api_endpoint {
            self.exporter_endpoint = format!("{}/v1/traces", v.trim_end_matches('/'));
            self.api_endpoint = v;
        }
        // exporter_endpoint override always wins over the api_endpoint-derived default.
        if let Some(v) = options.exporter_endpoint {
            self.exporter_endpoint = v;
        }
        if let Some(v) = options.service_name {
            self.service_name = v;
        }
        if let Some(v) = options.service_version {
            self.service_version = v;
        }
        if let Some(v) = options.environment {
            self.environment = v;
        }
        if let Some(v) = options.auto_start_session {
            self.auto_start_session = v;
        }
        if let Some(v) = options.default_tags {
            self.default_tags = v;
        }
    }

    pub(crate) fn auth_token_url(&self) -> String {
        format!("{}/auth/token", self.api_endpoint.trim_end_matches('/'))
    }

    /// Checked by [`crate::session::Session::init`] before anything is
    /// wired up. Failure here is the §7 "SDK initialization failure"
    /// row -- it never panics or propagates past `init`, it puts the
    /// session into degraded mode instead.
    pub(crate) fn validate(&self) -> Result<(), crate::error::SdkError> {
        if self.api_key.trim().is_empty() {
            return Err(crate::error::SdkError::MissingApiKey);
        }
        for endpoint in [&self.api_endpoint, &self.exporter_endpoint] {
            let parsed = reqwest::Url::parse(endpoint).map_err(|_| crate::error::SdkError::InvalidEndpoint(endpoint.clone()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(crate::error::SdkError::InvalidEndpoint(endpoint.clone()));
            }
        }
        Ok(())
    }
}

/// Log level as named by `AGENTOPS_LOG_LEVEL` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn from_env() -> Option<Self> {
        std::env::var("AGENTOPS_LOG_LEVEL")
            .ok()
            .and_then(|raw| match raw.to_lowercase().as_str() {
                "debug" => Some(LogLevel::Debug),
                "info" => Some(LogLevel::Info),
                "warning" | "warn" => Some(LogLevel::Warning),
                "error" => Some(LogLevel::Error),
                _ => None,
            })
    }

    pub(crate) fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Install a `tracing_subscriber` `fmt` layer filtered by
/// `AGENTOPS_LOG_LEVEL` (default `info`). Convenience for binaries
/// embedding the SDK that don't already own a subscriber; libraries
/// embedding the SDK should set up their own and skip this call.
pub fn init_logging() {
    let level = LogLevel::from_env().unwrap_or(LogLevel::Info);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
