//! Session report: one entry per target that was attempted.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::context::CommandRecord;
use crate::error::EngineError;
use crate::target::TargetStatus;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Outcome of one fan-out key.
#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub key: String,
    pub status: TargetStatus,
    pub duration: Duration,
    pub diagnostics: Vec<String>,
    pub commands: Vec<CommandRecord>,
    pub log: Option<PathBuf>,
}

/// Outcome of one target.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub name: String,
    pub description: Option<String>,
    pub status: TargetStatus,
    /// `None` when the action never ran.
    pub duration: Option<Duration>,
    /// Why the target did not run, for propagated failures and skips.
    pub reason: Option<String>,
    pub diagnostics: Vec<String>,
    pub commands: Vec<CommandRecord>,
    pub branches: Vec<BranchReport>,
    pub log: Option<PathBuf>,
}

impl ReportEntry {
    pub(crate) fn not_run(
        name: &str,
        description: Option<&str>,
        status: TargetStatus,
        reason: String,
    ) -> Self {
        Self {
            name: name.to_owned(),
            description: description.map(str::to_owned),
            status,
            duration: None,
            reason: Some(reason),
            diagnostics: Vec::new(),
            commands: Vec::new(),
            branches: Vec::new(),
            log: None,
        }
    }

    /// Failed branches of a parallel target, by key.
    pub fn failed_branches(&self) -> impl Iterator<Item = &BranchReport> {
        self.branches
            .iter()
            .filter(|b| b.status == TargetStatus::Failed)
    }
}

/// Everything a run did, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Builder name, e.g. `gdb`.
    pub name: String,
    /// Session label, e.g. the architecture.
    pub session: Option<String>,
    pub status: RunStatus,
    pub duration: Duration,
    pub entries: Vec<ReportEntry>,
    /// Set when a fatal error stopped the run.
    pub aborted: Option<String>,
}

impl Report {
    pub(crate) fn new(
        name: &str,
        session: Option<&str>,
        entries: Vec<ReportEntry>,
        duration: Duration,
        aborted: Option<String>,
    ) -> Self {
        let ok = aborted.is_none() && entries.iter().all(|e| e.status.is_ok());
        Self {
            name: name.to_owned(),
            session: session.map(str::to_owned),
            status: if ok {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed
            },
            duration,
            entries,
            aborted,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn entry(&self, name: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<TargetStatus> {
        self.entry(name).map(|e| e.status)
    }

    /// Human-readable summary table.
    pub fn render(&self) -> String {
        let width = self
            .entries
            .iter()
            .map(|e| e.name.len())
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let session = self
            .session
            .as_deref()
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();
        let status = match self.status {
            RunStatus::Succeeded => "ok",
            RunStatus::Failed => "FAILED",
        };
        let _ = writeln!(
            out,
            "Report for {}{session}: {status} in {:.2}s",
            self.name,
            self.duration.as_secs_f64()
        );

        for entry in &self.entries {
            let time = entry
                .duration
                .map_or_else(|| "-".to_owned(), |d| format!("{:.2}s", d.as_secs_f64()));
            let _ = write!(
                out,
                "  {:<7}  {:<width$}  {time:>8}",
                entry.status.as_str(),
                entry.name
            );
            if let Some(reason) = &entry.reason {
                let _ = write!(out, "  {reason}");
            }
            out.push('\n');

            for line in &entry.diagnostics {
                let _ = writeln!(out, "           {line}");
            }
            for branch in &entry.branches {
                let _ = writeln!(
                    out,
                    "           {:<7}  {}",
                    branch.status.as_str(),
                    branch.key
                );
                for line in &branch.diagnostics {
                    let _ = writeln!(out, "                    {line}");
                }
            }
            if let Some(log) = &entry.log {
                if !entry.status.is_ok() {
                    let _ = writeln!(out, "           log: {}", log.display());
                }
            }
        }

        if let Some(message) = &self.aborted {
            let _ = writeln!(out, "aborted: {message}");
        }
        out
    }

    /// Write the report as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if the report cannot be serialized or written.
    pub fn write_json(&self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| EngineError::ReportWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        mbuild_util::fs::write_file(path, json.as_bytes())?;
        Ok(())
    }
}
