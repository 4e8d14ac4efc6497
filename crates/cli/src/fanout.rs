// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrent fan-out of GET requests over the scanner catalog.
//!
//! One task is spawned per (endpoint, parameter set) combination. Each task
//! writes its own pre-sized slot, so `results[i]` always answers
//! `queries[i]` no matter which request finished first.

use tokio::task::JoinSet;

use crate::error::CliError;
use crate::transport::ApiClient;

/// A findings endpoint of one scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Filter key accepted by `--type`.
    pub key: &'static str,
    /// Display name.
    pub name: &'static str,
    pub path: &'static str,
}

pub const SCANNERS: [Endpoint; 7] = [
    Endpoint { key: "sast", name: "SAST", path: "/sast/findings" },
    Endpoint { key: "sca_dependencies", name: "SCA Dependencies", path: "/sca/dependencies/findings" },
    Endpoint { key: "sca_containers", name: "SCA Containers", path: "/sca/containers/findings" },
    Endpoint { key: "secrets", name: "Secrets", path: "/secrets/findings" },
    Endpoint { key: "pentest", name: "Pentest", path: "/dast/pentest/findings" },
    Endpoint { key: "bughunt", name: "BugHunt", path: "/dast/bughunt/findings" },
    Endpoint { key: "cspm", name: "CSPM", path: "/cspm/findings" },
];

/// Severities from most to least severe.
pub const SEVERITIES: [&str; 4] = ["critical", "high", "medium", "low"];

/// Severities at or above `threshold`. Unknown thresholds fall back to
/// critical and high.
pub fn severities_above_threshold(threshold: &str) -> &'static [&'static str] {
    match SEVERITIES.iter().position(|s| s.eq_ignore_ascii_case(threshold)) {
        Some(i) => &SEVERITIES[..=i],
        None => &SEVERITIES[..2],
    }
}

/// Endpoints matching a `--type` key, or `None` when nothing matches.
pub fn filter_by_type(endpoints: &[Endpoint], key: &str) -> Option<Vec<Endpoint>> {
    let matched: Vec<_> = endpoints.iter().filter(|e| e.key == key).copied().collect();
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

/// One request of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutQuery {
    pub endpoint: Endpoint,
    pub params: Vec<(String, String)>,
}

/// Cross every endpoint with every parameter set, endpoint-major:
/// `queries[i * variations.len() + j]` is endpoint `i` with variation `j`.
pub fn combinations(endpoints: &[Endpoint], variations: &[Vec<(String, String)>]) -> Vec<FanOutQuery> {
    endpoints
        .iter()
        .flat_map(|endpoint| {
            variations.iter().map(move |params| FanOutQuery { endpoint: *endpoint, params: params.clone() })
        })
        .collect()
}

/// Outcome of one query.
#[derive(Debug)]
pub struct FanOutResult {
    pub query: FanOutQuery,
    pub outcome: anyhow::Result<serde_json::Value>,
}

/// All outcomes, in query order.
#[derive(Debug)]
pub struct FanOutReport {
    pub results: Vec<FanOutResult>,
}

impl FanOutReport {
    /// True when there was at least one query and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.outcome.is_err())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&FanOutQuery, &anyhow::Error)> {
        self.results.iter().filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.query, e)))
    }

    /// Escalate a batch in which every request failed.
    ///
    /// Partial failure is left to the caller, which still evaluates the
    /// slots that succeeded.
    pub fn ensure_usable(self) -> anyhow::Result<Self> {
        if self.all_failed() {
            return Err(CliError::network(format!(
                "all {} API requests failed, cannot determine status",
                self.results.len()
            ))
            .into());
        }
        Ok(self)
    }
}

/// Issue every query concurrently and collect the outcomes by position.
///
/// A failed request only fails its own slot. Dropping the returned future
/// aborts every request still in flight.
pub async fn fan_out(client: &ApiClient, queries: Vec<FanOutQuery>) -> FanOutReport {
    let mut tasks = JoinSet::new();
    for (i, query) in queries.iter().enumerate() {
        let client = client.clone();
        let path = query.endpoint.path;
        let params = query.params.clone();
        tasks.spawn(async move { (i, client.get_json(path, &params).await) });
    }

    let mut slots: Vec<Option<anyhow::Result<serde_json::Value>>> = queries.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, outcome)) => slots[i] = Some(outcome),
            Err(e) => tracing::warn!(err = %e, "fan-out task failed"),
        }
    }

    let results = queries
        .into_iter()
        .zip(slots)
        .map(|(query, slot)| {
            let outcome = slot.unwrap_or_else(|| Err(anyhow::anyhow!("request task failed")));
            if let Err(ref e) = outcome {
                tracing::debug!(endpoint = query.endpoint.path, err = %e, "fan-out request failed");
            }
            FanOutResult { query, outcome }
        })
        .collect();
    FanOutReport { results }
}

/// Number of findings in a list response.
///
/// A bare array counts its elements; an object counts `items`, else uses a
/// numeric `total`. Anything else counts as zero.
pub fn count_findings(body: &serde_json::Value) -> u64 {
    match body {
        serde_json::Value::Array(items) => items.len() as u64,
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::Array(items)) = map.get("items") {
                return items.len() as u64;
            }
            map.get("total").and_then(|t| t.as_f64()).map(|t| t.max(0.0) as u64).unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod tests;
