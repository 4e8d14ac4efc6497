// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound HTTP plumbing: a small [`Transport`] seam and the decorators
//! layered on it (retry, auth, token caching) plus the client factory.

pub mod auth;
pub mod cache;
pub mod client;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::time::Duration;

pub use client::{ApiClient, ClientBuilder};

/// Boxed response future returned by [`Transport::execute`].
pub type ResponseFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<reqwest::Response>> + Send + 'a>>;

/// Sends one fully-built request.
///
/// Decorators wrap an inner transport and adjust the request or the
/// response handling around it.
pub trait Transport: Send + Sync {
    fn execute(&self, req: reqwest::Request) -> ResponseFuture<'_>;
}

/// Bottom of the stack: hands the request to a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, req: reqwest::Request) -> ResponseFuture<'_> {
        Box::pin(async move { Ok(self.client.execute(req).await?) })
    }
}

static CRYPTO_PROVIDER: Once = Once::new();

/// Build a `reqwest::Client` with the given overall request timeout.
///
/// Installs the ring crypto provider on first use; reqwest is built without
/// a bundled one.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(client)
}
