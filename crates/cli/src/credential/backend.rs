// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire client for the backend's CLI auth endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::{CliError, ErrorCode};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from `POST /auth/cli/session`.
#[derive(Clone, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub auth_url: String,
}

/// Response from `POST /auth/cli/token`.
#[derive(Default, Deserialize)]
pub struct TokenExchange {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub query_parameters: BTreeMap<String, String>,
    /// Non-empty when the backend refused the session.
    #[serde(default)]
    pub error: Option<String>,
}

/// Response from the refresh endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub query_parameters: Option<BTreeMap<String, String>>,
}

/// Client for the auth endpoints of one backend.
#[derive(Debug, Clone)]
pub struct AuthApi {
    base: Url,
    http: reqwest::Client,
}

impl AuthApi {
    pub fn new(base: Url) -> anyhow::Result<Self> {
        let http = crate::transport::http_client(AUTH_TIMEOUT)?;
        Ok(Self { base, http })
    }

    /// Auth backend for a tenant host (`https://api.<host>`).
    pub fn for_host(host: &str) -> anyhow::Result<Self> {
        let base = Url::parse(&format!("https://{}", api_host(host)))
            .map_err(|e| CliError::config(format!("invalid host {host:?}: {e}")))?;
        Self::new(base)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// Create a login session bound to the local callback `port`.
    pub async fn create_session(&self, port: u16) -> anyhow::Result<SessionResponse> {
        let resp = self
            .http
            .post(self.url("/auth/cli/session")?)
            .json(&serde_json::json!({ "port": port }))
            .send()
            .await?;
        let resp = check_status(resp, "session request").await?;
        decode(resp, "session response").await
    }

    /// Exchange a completed session for a token pair.
    pub async fn exchange(&self, session_id: &str) -> anyhow::Result<TokenExchange> {
        let resp = self
            .http
            .post(self.url("/auth/cli/token")?)
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await?;
        let resp = check_status(resp, "token request").await?;
        decode(resp, "token response").await
    }

    /// Trade a refresh token for a new access token.
    ///
    /// The refresh token travels as a cookie, never in the URL.
    pub async fn refresh(&self, refresh_token: &str) -> anyhow::Result<RefreshedToken> {
        let resp = self
            .http
            .get(self.url("/auth/refresh_token")?)
            .header(reqwest::header::COOKIE, format!("refresh_token={refresh_token}"))
            .send()
            .await?;
        let resp = check_status(resp, "refresh").await?;
        decode(resp, "refresh response").await
    }
}

/// API hostname for a tenant, prepending `api.` when missing.
pub fn api_host(host: &str) -> String {
    if host.starts_with("api.") {
        host.to_owned()
    } else {
        format!("api.{host}")
    }
}

async fn check_status(resp: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    // Drain so the connection can be reused; the body may echo secrets, so it is not surfaced.
    let _ = resp.bytes().await;
    let code = if status.as_u16() == 401 || status.as_u16() == 403 {
        ErrorCode::Auth
    } else {
        ErrorCode::Api
    };
    Err(CliError::new(code, format!("{what} returned status {}", status.as_u16())).into())
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> anyhow::Result<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CliError::protocol(format!("malformed {what}: {e}")).into())
}
