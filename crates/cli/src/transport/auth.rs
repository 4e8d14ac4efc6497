// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Url;

use crate::transport::cache::TokenCache;
use crate::transport::{ResponseFuture, Transport};

/// Client identification sent with every API request.
pub const CLIENT_USER_AGENT: &str = concat!("keel-cli/", env!("CARGO_PKG_VERSION"));

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Where the bearer token for each request comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A token fixed for the client's lifetime (one CLI invocation).
    Static(String),
    /// A cache refreshed from a provider (long-lived clients).
    Cached(Arc<TokenCache>),
}

impl TokenSource {
    async fn token(&self) -> String {
        match self {
            Self::Static(token) => token.clone(),
            Self::Cached(cache) => cache.token().await,
        }
    }
}

/// Pins requests to the tenant API host and attaches credentials.
///
/// The scheme, host and port of every request are replaced by those of
/// `base`, so a mis-scoped URL can never carry the token to another origin.
/// Tenant query parameters are appended unless the request already sets
/// the same key.
pub struct AuthTransport<T> {
    inner: T,
    base: Url,
    tokens: TokenSource,
    query: BTreeMap<String, String>,
}

impl<T: Transport> AuthTransport<T> {
    pub fn new(inner: T, base: Url, tokens: TokenSource, query: BTreeMap<String, String>) -> Self {
        Self { inner, base, tokens, query }
    }

    fn prepare(&self, req: &mut reqwest::Request, token: &str) -> anyhow::Result<()> {
        let url = req.url_mut();
        url.set_scheme(self.base.scheme())
            .map_err(|()| anyhow::anyhow!("cannot use scheme {}", self.base.scheme()))?;
        url.set_host(self.base.host_str())?;
        url.set_port(self.base.port())
            .map_err(|()| anyhow::anyhow!("cannot set port on {}", self.base))?;

        let present: HashSet<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let missing: Vec<_> =
            self.query.iter().filter(|(k, _)| !present.contains(k.as_str())).collect();
        if !missing.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in missing {
                pairs.append_pair(key, value);
            }
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))?;
        bearer.set_sensitive(true);
        let headers = req.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        Ok(())
    }
}

impl<T: Transport> Transport for AuthTransport<T> {
    fn execute(&self, mut req: reqwest::Request) -> ResponseFuture<'_> {
        Box::pin(async move {
            let token = self.tokens.token().await;
            self.prepare(&mut req, &token)?;
            self.inner.execute(req).await
        })
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
