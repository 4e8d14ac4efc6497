// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `auth`, `ci`.

pub mod auth;
pub mod ci;

use tokio_util::sync::CancellationToken;

use crate::config::{Command, Config};

/// Dispatch the parsed subcommand. Returns a process exit code.
pub async fn run(config: &Config, cancel: &CancellationToken) -> anyhow::Result<i32> {
    match config.command {
        Command::Auth(ref cmd) => auth::run(config, cmd, cancel).await,
        Command::Ci(ref cmd) => ci::run(config, cmd, cancel).await,
    }
}
