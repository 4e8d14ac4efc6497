// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API client assembled from the transport decorators.
//!
//! Requests flow [Retry] -> [Auth] -> HTTP: every retry re-enters the auth
//! layer, so a cached token refreshed between attempts is picked up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use tokio_util::sync::CancellationToken;

use crate::credential::lifecycle::TokenManager;
use crate::error::CliError;
use crate::transport::auth::{AuthTransport, TokenSource};
use crate::transport::cache::{TokenCache, TokenFuture, TokenProvider, DEFAULT_TTL};
use crate::transport::retry::{RetryPolicy, RetryTransport};
use crate::transport::{http_client, HttpTransport, Transport};

/// Per-request timeout of the underlying HTTP client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`ApiClient`].
pub struct ClientBuilder {
    base: Url,
    query: BTreeMap<String, String>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    timeout: Duration,
    ttl: Duration,
}

impl ClientBuilder {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            query: BTreeMap::new(),
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            timeout: REQUEST_TIMEOUT,
            ttl: DEFAULT_TTL,
        }
    }

    /// Tenant-scoping parameters attached to every request.
    pub fn query_parameters(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cancels in-flight retry backoff.
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Client authenticating with a fixed token.
    pub fn build_static(self, token: String) -> anyhow::Result<ApiClient> {
        self.assemble(TokenSource::Static(token))
    }

    /// Client that re-asks `provider` for a token once the cached one is
    /// older than the TTL. Fails if the initial token cannot be obtained.
    pub async fn build_refreshing(self, provider: TokenProvider) -> anyhow::Result<ApiClient> {
        let cache = TokenCache::new(provider, self.ttl).await?;
        self.assemble(TokenSource::Cached(Arc::new(cache)))
    }

    fn assemble(self, tokens: TokenSource) -> anyhow::Result<ApiClient> {
        let http = HttpTransport::new(http_client(self.timeout)?);
        let auth = AuthTransport::new(http, self.base.clone(), tokens, self.query);
        let retry = RetryTransport::new(auth, self.policy, self.cancel);
        Ok(ApiClient { transport: Arc::new(retry), base: self.base })
    }
}

/// Token provider backed by the stored credentials of `host`.
pub fn stored_token_provider(manager: TokenManager, host: String) -> TokenProvider {
    let manager = Arc::new(manager);
    Arc::new(move || -> TokenFuture {
        let manager = Arc::clone(&manager);
        let host = host.clone();
        Box::pin(async move { manager.get_valid_token(&host).await })
    })
}

/// Authenticated, retrying client for one tenant API.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base: Url,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("base", &self.base.as_str()).finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(base: Url) -> ClientBuilder {
        ClientBuilder::new(base)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Issue a GET and return the response whatever its status.
    pub async fn get(&self, path: &str, params: &[(String, String)]) -> anyhow::Result<reqwest::Response> {
        let mut url = self.base.join(path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        self.transport.execute(reqwest::Request::new(Method::GET, url)).await
    }

    /// GET `path` and decode a JSON body. Non-2xx statuses are errors.
    pub async fn get_json(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self.get(path, params).await?;
        let status = resp.status();
        if !status.is_success() {
            let _ = resp.bytes().await;
            return Err(CliError::api_status(status.as_u16(), path).into());
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CliError::protocol(format!("malformed response from {path}: {e}")).into())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
