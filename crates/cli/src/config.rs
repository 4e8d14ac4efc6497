// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use reqwest::Url;

use crate::credential::backend::api_host;
use crate::credential::lifecycle::TokenManager;
use crate::credential::persist::CredentialStore;
use crate::error::CliError;
use crate::ui::Printer;

/// Environment variable overriding the stored active host.
pub const HOST_ENV: &str = "KEEL_HOST";

/// Command-line client for a multi-tenant security platform.
#[derive(Debug, Parser)]
#[command(name = "keel", version, about)]
pub struct Config {
    /// Tenant host (e.g. acme.example.com). Falls back to KEEL_HOST, then
    /// the active host recorded at login.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Bearer token to use instead of stored credentials.
    #[arg(long, env = "KEEL_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Override the API base URL.
    #[arg(long, env = "KEEL_API_URL", global = true, hide = true)]
    pub api_url: Option<String>,

    /// Directory holding credentials and settings.
    #[arg(long, env = "KEEL_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "KEEL_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, env = "KEEL_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Disable colored output (also honors NO_COLOR).
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress output.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage authentication.
    #[command(subcommand)]
    Auth(AuthCommand),
    /// CI/CD integration.
    #[command(subcommand)]
    Ci(CiCommand),
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Log in through the browser.
    Login,
    /// Remove stored credentials for the host.
    Logout,
    /// Show authentication status for the host.
    Status,
    /// Print a valid access token, refreshing it if needed.
    Token,
    /// List stored hosts, or make `--host` the active one.
    Switch,
    /// Print the stored CLI settings as JSON.
    Config,
    /// Describe the stored identity for the host as JSON, without tokens.
    Whoami,
}

#[derive(Debug, Subcommand)]
pub enum CiCommand {
    /// Exit non-zero when open findings meet the severity threshold.
    Gate(GateArgs),
    /// Print a markdown summary of open findings.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct GateArgs {
    /// Minimum severity to fail on (critical, high, medium, low).
    #[arg(long, default_value = "high")]
    pub severity_threshold: String,

    /// Only check one finding type (sast, sca_dependencies, sca_containers,
    /// secrets, pentest, bughunt, cspm).
    #[arg(long = "type")]
    pub finding_type: Option<String>,

    /// Repository to scope findings to.
    #[arg(long)]
    pub repo: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Repository to scope findings to.
    #[arg(long)]
    pub repo: Option<String>,
}

impl Config {
    /// Validate flag combinations that clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(CliError::config(format!("invalid log format: {other} (expected text or json)")).into())
            }
        }
        if let Some(ref url) = self.api_url {
            parse_api_url(url)?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(crate::credential::config_dir)
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(self.config_dir())
    }

    pub fn token_manager(&self) -> anyhow::Result<TokenManager> {
        let base = self.api_url.as_deref().map(parse_api_url).transpose()?;
        Ok(TokenManager::new(self.store(), base))
    }

    pub fn printer(&self) -> Printer {
        Printer::new(!self.no_color && !Printer::no_color_env(), self.quiet)
    }

    /// Resolve the tenant host: `--host`, then `KEEL_HOST`, then the stored
    /// active host.
    pub fn resolve_host(&self) -> anyhow::Result<String> {
        let env = std::env::var(HOST_ENV).ok();
        let stored = self.store().active_host()?;
        resolve_host(self.host.as_deref(), env.as_deref(), stored.as_deref())
    }

    /// Base URL of the tenant API.
    pub fn api_base(&self, host: &str) -> anyhow::Result<Url> {
        match self.api_url {
            Some(ref url) => parse_api_url(url),
            None => Url::parse(&format!("https://{}", api_host(host)))
                .map_err(|e| CliError::config(format!("invalid host {host:?}: {e}")).into()),
        }
    }
}

fn parse_api_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).map_err(|e| CliError::config(format!("invalid API URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CliError::config(format!("invalid API URL scheme: {other}")).into()),
    }
}

/// Pick the host from an explicit flag, the environment, or stored settings.
///
/// An invalid flag is an error. An invalid environment value is logged and
/// skipped so a stale export does not block the stored host.
pub fn resolve_host(
    flag: Option<&str>,
    env: Option<&str>,
    stored: Option<&str>,
) -> anyhow::Result<String> {
    if let Some(flag) = flag {
        return sanitize_host(flag);
    }
    if let Some(env) = env.filter(|v| !v.trim().is_empty()) {
        match sanitize_host(env) {
            Ok(host) => return Ok(host),
            Err(e) => tracing::warn!(var = HOST_ENV, err = %e, "ignoring invalid host from environment"),
        }
    }
    if let Some(stored) = stored {
        return sanitize_host(stored);
    }
    Err(CliError::config("no host configured - pass --host or run 'keel auth login --host <host>'").into())
}

/// Normalize a user-supplied host: drop any scheme and path, lowercase, and
/// require a plain `host[:port]` authority.
pub fn sanitize_host(raw: &str) -> anyhow::Result<String> {
    let invalid = |why: &str| -> anyhow::Error { CliError::config(format!("invalid host {raw:?}: {why}")).into() };

    let mut host = raw.trim();
    if let Some((_, rest)) = host.split_once("://") {
        host = rest;
    }
    if let Some((authority, _)) = host.split_once('/') {
        host = authority;
    }
    let host = host.to_ascii_lowercase();

    if host.is_empty() {
        return Err(invalid("empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || matches!(c, '@' | '?' | '#' | '\\')) {
        return Err(invalid("unexpected character"));
    }
    let url = Url::parse(&format!("https://{host}")).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing hostname"));
    }
    Ok(host)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
