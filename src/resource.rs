//! Process-level resource attributes attached to every span (§3 "Resource").
//!
//! Modeled directly on the teacher's `setup_telemetry_machinery`, which
//! builds an `opentelemetry_sdk::Resource` from `SERVICE_NAME`/
//! `SERVICE_VERSION` semantic-convention keys. We keep using
//! `opentelemetry_sdk::Resource` and `opentelemetry-semantic-conventions`
//! for exactly that purpose, and add the AI-SDK-specific fields (project id,
//! SDK language tag, deployment environment) the teacher's GitHub-only use
//! case didn't need.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource as SdkResource;
use opentelemetry_semantic_conventions::attribute::{
    DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_NAME, SERVICE_VERSION,
};

use crate::config::Config;

/// Derive a stable project id from an API key without ever logging or
/// exporting the key itself. Good enough to disambiguate projects in
/// telemetry without being reversible to the key.
fn derive_project_id(api_key: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    api_key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Build the immutable resource attached to every span this process emits.
pub fn build(config: &Config) -> SdkResource {
    SdkResource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, config.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, config.environment.clone()),
            KeyValue::new("telemetry.sdk.language", "rust"),
            KeyValue::new("telemetry.sdk.name", "agentops"),
            KeyValue::new("telemetry.sdk.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("agentops.project.id", derive_project_id(&config.api_key)),
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_stable_for_the_same_key() {
        assert_eq!(derive_project_id("abc"), derive_project_id("abc"));
        assert_ne!(derive_project_id("abc"), derive_project_id("xyz"));
    }
}
