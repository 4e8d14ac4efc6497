// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `keel ci` subcommands: pipeline gate and markdown findings report.

use tokio_util::sync::CancellationToken;

use crate::config::{CiCommand, Config, GateArgs, ReportArgs};
use crate::error::{EXIT_FINDINGS, EXIT_SUCCESS};
use crate::fanout::{
    combinations, count_findings, fan_out, filter_by_type, severities_above_threshold, FanOutQuery,
    FanOutReport, SCANNERS, SEVERITIES,
};
use crate::transport::client::stored_token_provider;
use crate::transport::ApiClient;
use crate::ui::Printer;

pub async fn run(config: &Config, cmd: &CiCommand, cancel: &CancellationToken) -> anyhow::Result<i32> {
    match cmd {
        CiCommand::Gate(args) => gate(config, args, cancel).await,
        CiCommand::Report(args) => report(config, args, cancel).await,
    }
}

/// Build the API client for the resolved host. An explicit token bypasses
/// the credential store's refresh path.
async fn api_client(config: &Config, cancel: &CancellationToken) -> anyhow::Result<ApiClient> {
    let host = config.resolve_host()?;
    let query = config.store().get(&host)?.map(|c| c.query_parameters).unwrap_or_default();
    let builder = ApiClient::builder(config.api_base(&host)?).query_parameters(query).cancel(cancel.clone());
    match config.token {
        Some(ref token) => builder.build_static(token.clone()),
        None => builder.build_refreshing(stored_token_provider(config.token_manager()?, host)).await,
    }
}

/// One query per severity, each scoped to open findings.
fn severity_variations(severities: &[&str], repo: Option<&str>) -> Vec<Vec<(String, String)>> {
    severities
        .iter()
        .map(|sev| {
            let mut params = vec![
                ("severity".to_owned(), (*sev).to_owned()),
                ("status".to_owned(), "open".to_owned()),
                ("limit".to_owned(), "1".to_owned()),
            ];
            if let Some(repo) = repo {
                params.push(("repository".to_owned(), repo.to_owned()));
            }
            params
        })
        .collect()
}

fn severity_of(query: &FanOutQuery) -> &str {
    query.params.iter().find(|(k, _)| k == "severity").map_or("", |(_, v)| v.as_str())
}

fn warn_failures(printer: Printer, report: &FanOutReport) {
    for (query, err) in report.failures() {
        printer.warn(&format!("failed to query {} ({}): {err:#}", query.endpoint.name, severity_of(query)));
    }
}

async fn gate(config: &Config, args: &GateArgs, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let printer = config.printer();
    let severities = severities_above_threshold(&args.severity_threshold);
    let endpoints = match args.finding_type {
        Some(ref key) => filter_by_type(&SCANNERS, key).unwrap_or_else(|| {
            printer.warn(&format!("unknown finding type {key:?}, scanning all types"));
            SCANNERS.to_vec()
        }),
        None => SCANNERS.to_vec(),
    };

    let client = api_client(config, cancel).await?;
    let queries = combinations(&endpoints, &severity_variations(severities, args.repo.as_deref()));
    let report = fan_out(&client, queries).await;
    warn_failures(printer, &report);
    let report = report.ensure_usable()?;

    let outcome = evaluate_gate(&report);
    for line in &outcome.failures {
        println!("{line}");
    }
    if outcome.total > 0 {
        println!("\nGate failed: {} findings at or above {} severity", outcome.total, args.severity_threshold);
        return Ok(EXIT_FINDINGS);
    }
    println!("Gate passed: no findings above threshold");
    Ok(EXIT_SUCCESS)
}

async fn report(config: &Config, args: &ReportArgs, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let printer = config.printer();
    let client = api_client(config, cancel).await?;
    let queries = combinations(&SCANNERS, &severity_variations(&SEVERITIES, args.repo.as_deref()));
    let report = fan_out(&client, queries).await;
    warn_failures(printer, &report);
    let report = report.ensure_usable()?;
    print!("{}", render_report(&report));
    Ok(EXIT_SUCCESS)
}

/// Result of evaluating a gate fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GateOutcome {
    /// Total findings across successful queries.
    pub total: u64,
    /// One `FAIL:` line per query with findings, in query order.
    pub failures: Vec<String>,
}

pub fn evaluate_gate(report: &FanOutReport) -> GateOutcome {
    let mut outcome = GateOutcome::default();
    for result in &report.results {
        let Ok(ref body) = result.outcome else { continue };
        let count = count_findings(body);
        if count == 0 {
            continue;
        }
        outcome.total += count;
        outcome.failures.push(format!(
            "FAIL: {} has {count} {} findings",
            result.query.endpoint.name,
            severity_of(&result.query)
        ));
    }
    outcome
}

/// Markdown table of non-zero counts, rows in query order.
pub fn render_report(report: &FanOutReport) -> String {
    let mut out = String::from("## Security Report\n\n| Scanner | Severity | Count |\n|---------|----------|-------|\n");
    for result in &report.results {
        let Ok(ref body) = result.outcome else { continue };
        let count = count_findings(body);
        if count > 0 {
            out.push_str(&format!(
                "| {} | {} | {count} |\n",
                result.query.endpoint.name,
                severity_of(&result.query)
            ));
        }
    }
    out.push_str("\n*Generated by keel*\n");
    out
}

#[cfg(test)]
#[path = "ci_tests.rs"]
mod tests;
