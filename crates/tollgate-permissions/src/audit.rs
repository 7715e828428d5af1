//! Append-only audit log of permission decisions.
//!
//! One JSON object per line:
//! `{"ts": "...", "tool": "Bash", "command": "...", "pattern": "...", "result": "allow", "source": "settings_allow"}`

use crate::types::{CheckDetail, Provenance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tollgate_types::Action;

/// Final disposition of an evaluated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// Allowed without asking.
    Allow,
    /// Denied by settings.
    Deny,
    UserAllowed,
    UserDenied,
    UserSessionGrant,
    /// Nobody answered in time; treated as a deny.
    ApprovalTimeout,
}

impl AuditResult {
    /// Whether the action went to a human, answered or not.
    pub fn is_human(&self) -> bool {
        matches!(
            self,
            Self::UserAllowed | Self::UserDenied | Self::UserSessionGrant | Self::ApprovalTimeout
        )
    }
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub result: AuditResult,
    /// The engine layer that decided, or asked for, the action.
    pub source: Provenance,
}

impl AuditEntry {
    pub fn new(action: &Action, detail: &CheckDetail, result: AuditResult) -> Self {
        Self {
            ts: Utc::now(),
            tool: action.tool_name.clone(),
            command: action.shell_command().map(str::to_string),
            pattern: detail.pattern.clone(),
            result,
            source: detail.provenance,
        }
    }
}

/// Destination for audit entries. Appends are best effort and never fail
/// the tool call.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry);
}

/// Audit log written as JSON Lines to a file.
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the current log aside to `<name>.prev`, replacing any older one.
    pub fn rotate(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            return;
        }
        let mut prev = self.path.clone().into_os_string();
        prev.push(".prev");
        if let Err(e) = std::fs::rename(&self.path, &prev) {
            tracing::warn!("Failed to rotate audit log {}: {}", self.path.display(), e);
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize audit entry: {e}");
                return;
            }
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.write_line(&line) {
            tracing::warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }
}

/// In-memory audit sink, for embedding and tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
    }
}

/// How often a human decided the same `(tool, command)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCount {
    pub tool: String,
    pub command: Option<String>,
    pub count: usize,
}

/// Aggregate view of an audit log, used to spot rules worth adding to settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub total_checks: usize,
    pub tool_counts: HashMap<String, usize>,
    pub pattern_hits: HashMap<String, usize>,
    /// Checks that went to a human, including timeouts.
    pub human_decisions: usize,
    /// Human approvals (once or for the session), most frequent first.
    pub user_approved: Vec<DecisionCount>,
    /// Human denials, most frequent first.
    pub user_denied: Vec<DecisionCount>,
}

impl AuditSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.total_checks += 1;
            *summary.tool_counts.entry(entry.tool.clone()).or_default() += 1;
            if let Some(pattern) = &entry.pattern {
                *summary.pattern_hits.entry(pattern.clone()).or_default() += 1;
            }
            if entry.result.is_human() {
                summary.human_decisions += 1;
            }
            match entry.result {
                AuditResult::UserAllowed | AuditResult::UserSessionGrant => {
                    bump(&mut summary.user_approved, entry);
                }
                AuditResult::UserDenied => bump(&mut summary.user_denied, entry),
                _ => {}
            }
        }
        // Stable sort keeps first-seen order among equal counts.
        summary.user_approved.sort_by(|a, b| b.count.cmp(&a.count));
        summary.user_denied.sort_by(|a, b| b.count.cmp(&a.count));
        summary
    }
}

fn bump(counts: &mut Vec<DecisionCount>, entry: &AuditEntry) {
    match counts
        .iter_mut()
        .find(|c| c.tool == entry.tool && c.command == entry.command)
    {
        Some(existing) => existing.count += 1,
        None => counts.push(DecisionCount {
            tool: entry.tool.clone(),
            command: entry.command.clone(),
            count: 1,
        }),
    }
}

/// Read and summarize a JSON Lines audit log. Unparseable lines, including
/// ones that are not valid UTF-8, are skipped.
pub fn summarize(path: &Path) -> std::io::Result<AuditSummary> {
    let file = std::fs::File::open(path)?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        if line.trim_ascii().is_empty() {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping audit line {} in {}: {}", index + 1, path.display(), e),
        }
    }
    Ok(AuditSummary::from_entries(&entries))
}
