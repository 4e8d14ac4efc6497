// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `keel auth` subcommands for managing stored credentials.

use chrono::{DateTime, SecondsFormat};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{sanitize_host, AuthCommand, Config};
use crate::credential::backend::AuthApi;
use crate::credential::login::LoginFlow;
use crate::credential::{epoch_secs, Credentials, HostCredentials};
use crate::error::{CliError, EXIT_SUCCESS};

pub async fn run(config: &Config, cmd: &AuthCommand, cancel: &CancellationToken) -> anyhow::Result<i32> {
    match cmd {
        AuthCommand::Login => login(config, cancel).await,
        AuthCommand::Logout => logout(config),
        AuthCommand::Status => status(config),
        AuthCommand::Token => token(config).await,
        AuthCommand::Switch => switch(config),
        AuthCommand::Config => show_config(config),
        AuthCommand::Whoami => whoami(config),
    }
}

async fn login(config: &Config, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let host = config.resolve_host()?;
    let api = AuthApi::new(config.api_base(&host)?)?;
    LoginFlow::new(api, config.store(), config.printer()).run(&host, cancel).await?;
    Ok(EXIT_SUCCESS)
}

fn logout(config: &Config) -> anyhow::Result<i32> {
    let host = config.resolve_host()?;
    config.store().delete(&host)?;
    tracing::info!(host, "credentials removed");
    config.printer().success(&format!("Logged out of {host}"));
    Ok(EXIT_SUCCESS)
}

fn status(config: &Config) -> anyhow::Result<i32> {
    let host = config.resolve_host()?;
    let creds = config.store().get(&host)?;
    println!("{}", status_line(&host, creds.as_ref(), epoch_secs()));
    Ok(EXIT_SUCCESS)
}

async fn token(config: &Config) -> anyhow::Result<i32> {
    if let Some(ref token) = config.token {
        println!("{token}");
        return Ok(EXIT_SUCCESS);
    }
    let host = config.resolve_host()?;
    let token = config.token_manager()?.get_valid_token(&host).await?;
    println!("{token}");
    Ok(EXIT_SUCCESS)
}

fn switch(config: &Config) -> anyhow::Result<i32> {
    let store = config.store();
    let Some(ref requested) = config.host else {
        let creds = store.load()?.unwrap_or_default();
        if creds.is_empty() {
            println!("No stored credentials. Run 'keel auth login --host <host>'.");
            return Ok(EXIT_SUCCESS);
        }
        let active = store.active_host()?;
        for line in host_listing(&creds, active.as_deref()) {
            println!("{line}");
        }
        return Ok(EXIT_SUCCESS);
    };

    let host = sanitize_host(requested)?;
    if store.get(&host)?.is_none() {
        return Err(CliError::auth(format!(
            "not authenticated for {host} - run 'keel auth login --host {host}'"
        ))
        .into());
    }
    store.set_active_host(&host)?;
    config.printer().success(&format!("Switched to {host}"));
    Ok(EXIT_SUCCESS)
}

fn show_config(config: &Config) -> anyhow::Result<i32> {
    match config.store().load_settings()? {
        Some(settings) => println!("{}", serde_json::to_string_pretty(&settings)?),
        None => println!("No configuration found. Run 'keel auth login --host <host>'."),
    }
    Ok(EXIT_SUCCESS)
}

fn whoami(config: &Config) -> anyhow::Result<i32> {
    let host = config.resolve_host()?;
    let creds = config.store().get(&host)?;
    println!("{}", serde_json::to_string_pretty(&whoami_info(&host, creds.as_ref()))?);
    Ok(EXIT_SUCCESS)
}

/// JSON identity summary for `host`. Never includes token material.
pub fn whoami_info(host: &str, creds: Option<&HostCredentials>) -> serde_json::Value {
    let Some(creds) = creds else {
        return json!({
            "host": host,
            "authenticated": false,
            "error": format!("no credentials for host {host}"),
        });
    };
    let mut info = json!({ "host": host, "authenticated": true });
    if !creds.query_parameters.is_empty() {
        info["query_parameters"] = json!(creds.query_parameters);
    }
    if creds.expires_at > 0 {
        info["expires_at"] = json!(creds.expires_at);
        info["expired"] = json!(creds.is_expired());
    }
    info
}

/// One-line authentication summary for `host` at `now` (epoch seconds).
pub fn status_line(host: &str, creds: Option<&HostCredentials>, now: i64) -> String {
    let Some(creds) = creds else {
        return format!("{host}: not authenticated");
    };
    if creds.is_expired_at(now) {
        if creds.refresh_token().is_some() {
            return format!("{host}: token expired (will auto-refresh on next command)");
        }
        return format!("{host}: token expired - run 'keel auth login --host {host}'");
    }
    match DateTime::from_timestamp(creds.expires_at, 0).filter(|_| creds.expires_at > 0) {
        Some(at) => format!(
            "{host}: authenticated (expires {})",
            at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => format!("{host}: authenticated"),
    }
}

/// Stored hosts, the active one marked with `*`.
pub fn host_listing(creds: &Credentials, active: Option<&str>) -> Vec<String> {
    creds
        .keys()
        .map(|host| {
            let marker = if Some(host.as_str()) == active { '*' } else { ' ' };
            format!("{marker} {host}")
        })
        .collect()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
