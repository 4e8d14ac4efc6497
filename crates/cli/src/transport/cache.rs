// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time-boxed access-token cache for long-lived clients.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Default lifetime of a cached token before the provider is asked again.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a failed refresh suppresses further provider calls. Capped at
/// the TTL.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

pub type TokenFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Supplies a fresh access token on demand.
pub type TokenProvider = Arc<dyn Fn() -> TokenFuture + Send + Sync>;

struct Snapshot {
    token: String,
    fetched_at: Instant,
    /// Set after a failed refresh; the stale token is served until then.
    retry_after: Option<Instant>,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl || self.retry_after.is_some_and(|at| Instant::now() < at)
    }
}

/// Shares one access token across concurrent requests.
///
/// Readers take the shared lock while the token is fresh. A stale token is
/// refreshed under the exclusive lock after re-checking freshness, so a burst
/// of concurrent callers triggers a single provider call. When the provider
/// fails the stale token is handed out, and callers queued behind the failed
/// refresh reuse it until a short backoff elapses.
pub struct TokenCache {
    provider: TokenProvider,
    ttl: Duration,
    snapshot: RwLock<Snapshot>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Fetch the initial token. Fails if the provider cannot produce one.
    pub async fn new(provider: TokenProvider, ttl: Duration) -> anyhow::Result<Self> {
        let token = provider().await?;
        Ok(Self {
            provider,
            ttl,
            snapshot: RwLock::new(Snapshot { token, fetched_at: Instant::now(), retry_after: None }),
        })
    }

    pub async fn token(&self) -> String {
        {
            let snap = self.snapshot.read().await;
            if snap.is_fresh(self.ttl) {
                return snap.token.clone();
            }
        }

        let mut snap = self.snapshot.write().await;
        if snap.is_fresh(self.ttl) {
            return snap.token.clone();
        }
        match (self.provider)().await {
            Ok(token) => {
                tracing::debug!("access token cache refreshed");
                snap.token = token;
                snap.fetched_at = Instant::now();
                snap.retry_after = None;
            }
            Err(e) => {
                let backoff = FAILURE_BACKOFF.min(self.ttl);
                tracing::warn!(
                    err = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "token refresh failed, using cached token"
                );
                snap.retry_after = Some(Instant::now() + backoff);
            }
        }
        snap.token.clone()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
