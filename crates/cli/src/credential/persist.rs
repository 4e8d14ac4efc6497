// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: load/save JSON files with atomic owner-only writes.
//!
//! Every write replaces the whole file (write temp + rename), so a reader
//! never sees a half-written record. There is no cross-process locking: two
//! concurrent invocations saving the same store race and the last rename wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credential::{Credentials, HostCredentials};

const CREDENTIALS_FILE: &str = "credentials.json";
const SETTINGS_FILE: &str = "config.json";

/// Non-secret CLI settings stored next to the credentials.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// The active default host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// File-backed store of per-host credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    /// Load all stored credentials. `Ok(None)` when the file does not exist.
    ///
    /// A corrupt file is a decode error, never "no credentials".
    pub fn load(&self) -> anyhow::Result<Option<Credentials>> {
        read_json(&self.credentials_path())
    }

    /// Load the credentials for one host.
    pub fn get(&self, host: &str) -> anyhow::Result<Option<HostCredentials>> {
        Ok(self.load()?.and_then(|mut creds| creds.remove(host)))
    }

    /// Overwrite the credential file with `creds`.
    pub fn save(&self, creds: &Credentials) -> anyhow::Result<()> {
        write_private(&self.credentials_path(), creds)
    }

    /// Insert or replace one host's record (load, upsert, save).
    pub fn save_one(&self, host: &str, host_creds: HostCredentials) -> anyhow::Result<()> {
        let mut creds = self.load()?.unwrap_or_default();
        creds.insert(host.to_owned(), host_creds);
        self.save(&creds)?;
        tracing::debug!(host, path = %self.credentials_path().display(), "saved credentials");
        Ok(())
    }

    /// Remove one host's record. A missing file is not an error.
    pub fn delete(&self, host: &str) -> anyhow::Result<()> {
        let Some(mut creds) = self.load()? else {
            return Ok(());
        };
        creds.remove(host);
        self.save(&creds)
    }

    pub fn load_settings(&self) -> anyhow::Result<Option<Settings>> {
        read_json(&self.settings_path())
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        write_private(&self.settings_path(), settings)
    }

    /// Record `host` as the active default.
    pub fn set_active_host(&self, host: &str) -> anyhow::Result<()> {
        let mut settings = self.load_settings()?.unwrap_or_default();
        settings.host = Some(host.to_owned());
        self.save_settings(&settings)
    }

    pub fn active_host(&self) -> anyhow::Result<Option<String>> {
        Ok(self.load_settings()?.and_then(|s| s.host).filter(|h| !h.is_empty()))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&contents)
        .map_err(|e| anyhow::Error::new(e).context(format!("decoding {}", path.display())))?;
    Ok(Some(value))
}

/// Serialize `value` and atomically replace `path` with mode 0600.
///
/// The temp file is created in the destination directory so the final
/// rename never crosses filesystems.
pub fn write_private<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    create_private_dir(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
