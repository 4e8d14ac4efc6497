// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use std::fmt;

/// Process exit code for a clean run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when a gate finds findings above threshold.
pub const EXIT_FINDINGS: i32 = 1;

/// Failure classes shared by the credential, transport, and fan-out layers.
///
/// The top-level binary maps each class onto a distinct exit code so
/// automation can tell "log in again" apart from "the API is down".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or missing host configuration.
    Config,
    /// No credentials, expired with no refresh path, or refresh rejected.
    Auth,
    /// Connection failures, timeouts, or a fan-out where every request failed.
    Network,
    /// Non-2xx API status (429/5xx after the retry budget, or any other).
    Api,
    /// Malformed responses or a session mismatch during login.
    Protocol,
    /// The user interrupted the operation.
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config => 1,
            Self::Auth => 2,
            Self::Network => 3,
            Self::Api => 3,
            Self::Protocol => 1,
            Self::Cancelled => 130,
            Self::Internal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Auth => "AUTH",
            Self::Network => "NETWORK",
            Self::Api => "API",
            Self::Protocol => "PROTOCOL",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure carried inside an [`anyhow::Error`] chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    pub code: ErrorCode,
    pub message: String,
}

impl CliError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Build the error for a non-2xx API response.
    ///
    /// 401 means the credential itself was rejected, so the remediation is a
    /// fresh login rather than a retry.
    pub fn api_status(status: u16, endpoint: &str) -> Self {
        if status == 401 {
            return Self::auth(format!(
                "API rejected the credential (401) on {endpoint} - run 'keel auth login'"
            ));
        }
        Self::new(ErrorCode::Api, format!("API returned {status} on {endpoint}"))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

/// Determine the failure class of an error by walking its cause chain.
pub fn classify(err: &anyhow::Error) -> ErrorCode {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.code;
        }
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            if req.is_decode() {
                return ErrorCode::Protocol;
            }
            return ErrorCode::Network;
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return ErrorCode::Protocol;
        }
    }
    ErrorCode::Internal
}

/// Exit code for an error that reached the top-level boundary.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    classify(err).exit_code()
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
