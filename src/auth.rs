//! API-key-to-bearer-token exchange and refresh (§4.3, §6).
//!
//! The teacher authenticates to the GitHub API with a static bearer token
//! read straight from an environment variable (`setup_api_client` in
//! `github.rs`). We generalize that one-shot header-building idiom into a
//! refreshing token cache: the exporter never blocks span production while
//! unauthenticated (§4.3), so the cache is a `parking_lot::Mutex`-guarded
//! cell that `exporter.rs` polls rather than something callers `.await` for
//! a lock across a long network call.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::ExportError;

/// How far ahead of actual expiry we refresh (§4.3).
const REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Guards against concurrent refreshes: "refresh is serialized -- only one
/// refresh attempt in flight at a time" (§5).
pub struct TokenCache {
    client: reqwest::Client,
    auth_url: String,
    api_key: String,
    state: Mutex<Option<CachedToken>>,
    refreshing: tokio::sync::Mutex<()>,
}

impl TokenCache {
    pub fn new(client: reqwest::Client, auth_url: String, api_key: String) -> Self {
        TokenCache {
            client,
            auth_url,
            api_key,
            state: Mutex::new(None),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// A currently-valid token, if the cache has one and it isn't within
    /// the refresh skew of expiring.
    pub fn valid_token(&self) -> Option<String> {
        let guard = self.state.lock();
        guard.as_ref().and_then(|cached| {
            if cached.expires_at > Instant::now() + REFRESH_SKEW {
                Some(cached.token.clone())
            } else {
                None
            }
        })
    }

    /// Exchange the API key for a fresh bearer token, replacing whatever
    /// was cached. Serialized across concurrent callers by `refreshing`.
    pub async fn refresh(&self) -> Result<String, ExportError> {
        let _serialize = self.refreshing.lock().await;

        // another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }

        let response = self
            .client
            .post(&self.auth_url)
            .form(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|source| ExportError::Transport {
                endpoint: self.auth_url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ExportError::Unauthenticated);
        }

        let parsed: TokenResponse = response.json().await.map_err(|_| ExportError::AuthResponseShape)?;

        let token = parsed.token.clone();
        let expires_at = Instant::now() + Duration::from_secs(parsed.expires_in);
        *self.state.lock() = Some(CachedToken { token: token.clone(), expires_at });

        Ok(token)
    }

    /// `true` once at least one successful exchange has happened.
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().is_some()
    }
}
