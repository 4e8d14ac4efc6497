// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host credentials: storage, refresh lifecycle, and browser login.
//!
//! Credentials are kept in a single owner-only JSON file keyed by tenant host.
//! [`lifecycle::TokenManager`] hands out usable access tokens (refreshing
//! lazily on observed expiry) and [`login::LoginFlow`] obtains a fresh pair
//! through the browser.

pub mod backend;
pub mod lifecycle;
pub mod login;
pub mod persist;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Stored credentials for one tenant host.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch seconds. `0` means the token never expires.
    #[serde(default)]
    pub expires_at: i64,
    /// Tenant-scoping parameters attached to every outbound request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_parameters: BTreeMap<String, String>,
}

impl HostCredentials {
    /// Whether the access token has reached its expiry at `now` (epoch
    /// seconds). The expiry second itself is already expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at > 0 && now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }

    /// The refresh token, treating an empty string as absent.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

// Tokens must never reach logs or error text.
impl fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("query_parameters", &self.query_parameters)
            .finish()
    }
}

/// All stored credentials, keyed by host.
pub type Credentials = BTreeMap<String, HostCredentials>;

/// Convert a relative lifetime into an absolute expiry.
///
/// A missing (zero) lifetime yields a token that is already expired, so the
/// next use goes through refresh.
pub fn expires_at_from(expires_in: u64) -> i64 {
    epoch_secs().saturating_add(i64::try_from(expires_in).unwrap_or(i64::MAX))
}

pub fn epoch_secs() -> i64 {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Resolve the per-user configuration directory.
///
/// Checks `KEEL_CONFIG_DIR`, then `$XDG_CONFIG_HOME/keel`,
/// then `$HOME/.config/keel`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KEEL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("keel");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/keel");
    }
    PathBuf::from(".keel")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
