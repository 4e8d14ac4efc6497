// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing progress output.

use colored::Colorize;

/// Writes progress lines to stdout and warnings to stderr.
///
/// Styling is applied only when `color` is set; `quiet` drops progress
/// lines but never warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer {
    color: bool,
    quiet: bool,
}

impl Printer {
    pub fn new(color: bool, quiet: bool) -> Self {
        Self { color, quiet }
    }

    /// Whether `NO_COLOR` is set to a non-empty value.
    pub fn no_color_env() -> bool {
        std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
    }

    pub fn color(&self) -> bool {
        self.color
    }

    pub fn progress(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", self.success_line(msg));
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", self.warn_line(msg));
    }

    pub fn success_line(&self, msg: &str) -> String {
        if self.color {
            format!("{} {msg}", "✓".green().bold())
        } else {
            format!("✓ {msg}")
        }
    }

    pub fn warn_line(&self, msg: &str) -> String {
        if self.color {
            format!("{} {msg}", "warning:".yellow().bold())
        } else {
            format!("warning: {msg}")
        }
    }

    /// Style a host name or URL the user needs to notice.
    pub fn emphasis(&self, text: &str) -> String {
        if self.color {
            text.cyan().to_string()
        } else {
            text.to_owned()
        }
    }
}

#[cfg(test)]
#[path = "ui_tests.rs"]
mod tests;
