// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle: decide whether a stored token is usable and refresh it
//! on observed expiry.
//!
//! Refresh is lazy. A token is only refreshed once it is past `expires_at`,
//! never speculatively, so ordinary commands make no extra network calls.

use reqwest::Url;

use crate::credential::backend::AuthApi;
use crate::credential::persist::CredentialStore;
use crate::credential::{epoch_secs, expires_at_from, HostCredentials};
use crate::error::CliError;

/// Hands out valid access tokens for stored hosts.
#[derive(Debug, Clone)]
pub struct TokenManager {
    store: CredentialStore,
    /// Backend override; `None` derives `https://api.<host>` per host.
    auth_base: Option<Url>,
}

impl TokenManager {
    pub fn new(store: CredentialStore, auth_base: Option<Url>) -> Self {
        Self { store, auth_base }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn auth_api(&self, host: &str) -> anyhow::Result<AuthApi> {
        match self.auth_base {
            Some(ref base) => AuthApi::new(base.clone()),
            None => AuthApi::for_host(host),
        }
    }

    /// Return a usable access token for `host`, refreshing it if expired.
    pub async fn get_valid_token(&self, host: &str) -> anyhow::Result<String> {
        let Some(creds) = self.store.get(host)? else {
            return Err(CliError::auth(format!(
                "not authenticated for {host} - run 'keel auth login --host {host}'"
            ))
            .into());
        };

        if !creds.is_expired_at(epoch_secs()) {
            return Ok(creds.access_token);
        }

        let Some(refresh_token) = creds.refresh_token() else {
            return Err(CliError::auth(format!(
                "token for {host} expired - run 'keel auth login --host {host}'"
            ))
            .into());
        };

        tracing::debug!(host, "access token expired, attempting refresh");
        let refreshed = match self.auth_api(host)?.refresh(refresh_token).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(host, err = %e, "token refresh failed");
                return Err(CliError::auth(format!(
                    "token for {host} expired and refresh failed ({e}) - run 'keel auth login --host {host}'"
                ))
                .into());
            }
        };

        let updated = HostCredentials {
            access_token: refreshed.access_token,
            refresh_token: Some(refresh_token.to_owned()),
            expires_at: expires_at_from(refreshed.expires_in),
            query_parameters: refreshed.query_parameters.unwrap_or(creds.query_parameters),
        };
        self.store.save_one(host, updated.clone())?;
        tracing::info!(host, expires_at = updated.expires_at, "access token refreshed");
        Ok(updated.access_token)
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
