//! Tracing setup and the end-of-session report.
//!
//! The report is optional and written by the caller after a run:
//! `<dir>/repair-session.json` holds the complete [`SessionOutcome`] plus a
//! condensed [`SessionSummary`], and is overwritten by the next session.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::orchestrator::{SessionOutcome, Verdict};
use crate::state_machine::RepairState;

pub const SESSION_REPORT_FILE: &str = "repair-session.json";

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Condensed, one-line view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: RepairState,
    pub reason: Option<String>,
    pub build_attempts: u32,
    pub accepted_patches: usize,
    pub rejections: u32,
    pub unknown_rejections: u32,
    pub final_error_count: usize,
    pub total_build_ms: u64,
    pub elapsed_ms: i64,
    pub timestamp: String,
}

impl SessionSummary {
    pub fn from_outcome(outcome: &SessionOutcome) -> Self {
        let mut seen_builds = std::collections::HashSet::new();
        let total_build_ms = outcome
            .attempts
            .iter()
            .filter(|a| seen_builds.insert(a.attempt_number))
            .map(|a| a.build_result.duration_ms)
            .sum::<u64>()
            + outcome
                .last_build
                .as_ref()
                .filter(|b| b.success)
                .map_or(0, |b| b.duration_ms);

        Self {
            session_id: outcome.session_id.clone(),
            state: outcome.state,
            reason: outcome.reason.clone(),
            build_attempts: outcome.build_attempts,
            accepted_patches: outcome
                .attempts
                .iter()
                .filter(|a| a.verdict == Verdict::Accepted)
                .count(),
            rejections: outcome.rejection_count,
            unknown_rejections: outcome.unknown_rejections,
            final_error_count: outcome
                .last_build
                .as_ref()
                .map_or(0, |b| b.errors().count()),
            total_build_ms,
            elapsed_ms: (outcome.finished_at - outcome.started_at).num_milliseconds(),
            timestamp: outcome.finished_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct SessionReport<'a> {
    summary: SessionSummary,
    outcome: &'a SessionOutcome,
}

/// Write summary and full outcome to `repair-session.json` in `dir`.
pub fn write_session_report(outcome: &SessionOutcome, dir: &Path) -> Option<PathBuf> {
    let path = dir.join(SESSION_REPORT_FILE);
    let report = SessionReport {
        summary: SessionSummary::from_outcome(outcome),
        outcome,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => {
                info!(path = %path.display(), "Wrote session report");
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write session report: {e}");
                None
            }
        },
        Err(e) => {
            warn!("Failed to serialize session report: {e}");
            None
        }
    }
}
