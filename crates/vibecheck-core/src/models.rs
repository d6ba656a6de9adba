//! Assessment / Finding / AgentLog / TunnelSession data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assessment execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Static analysis of source files.
    Lightweight,
    /// Live HTTP probing driven by LLM agents.
    Robust,
}

impl Mode {
    /// Parse from the lowercase wire/storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lightweight" => Some(Mode::Lightweight),
            "robust" => Some(Mode::Robust),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Lightweight => write!(f, "lightweight"),
            Mode::Robust => write!(f, "robust"),
        }
    }
}

/// Coarse budget dial controlling coverage/agent-loop limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Cheapest, narrowest pass.
    Quick,
    /// Default balance of coverage and cost.
    Standard,
    /// Widest, most expensive pass.
    Deep,
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Standard
    }
}

impl Depth {
    /// Parse from the lowercase wire/storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(Depth::Quick),
            "standard" => Some(Depth::Standard),
            "deep" => Some(Depth::Deep),
            _ => None,
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Quick => write!(f, "quick"),
            Depth::Standard => write!(f, "standard"),
            Depth::Deep => write!(f, "deep"),
        }
    }
}

/// Assessment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created, background work not yet started.
    Queued,
    /// Lightweight-only: repository clone in progress.
    Cloning,
    /// Lightweight-only: analyzers running.
    Analyzing,
    /// Robust-only: coverage discovery and agent loops running.
    Scanning,
    /// Terminal: finished successfully.
    Complete,
    /// Terminal: finished with a recorded error.
    Failed,
}

impl Status {
    /// Terminal statuses are the only ones from which `rerun` is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed)
    }
}

impl Status {
    /// Parse from the lowercase wire/storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Status::Queued),
            "cloning" => Some(Status::Cloning),
            "analyzing" => Some(Status::Analyzing),
            "scanning" => Some(Status::Scanning),
            "complete" => Some(Status::Complete),
            "failed" => Some(Status::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Cloning => "cloning",
            Status::Analyzing => "analyzing",
            Status::Scanning => "scanning",
            Status::Complete => "complete",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate, high-impact issue.
    Critical,
    /// Serious issue.
    High,
    /// Moderate issue.
    Medium,
    /// Minor issue.
    Low,
    /// Informational, not itself a vulnerability.
    Info,
}

impl Severity {
    /// Rank for sort-by-severity (ascending rank = ascending severity).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }

    /// Parse from a free-form string (used when validating LLM output); returns
    /// `None` for anything outside the five allowed values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

/// Non-negative per-severity counts plus their total, owned exclusively by an assessment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    /// Count of critical findings.
    pub critical: u32,
    /// Count of high findings.
    pub high: u32,
    /// Count of medium findings.
    pub medium: u32,
    /// Count of low findings.
    pub low: u32,
    /// Count of info findings.
    pub info: u32,
    /// Sum of all the above.
    pub total: u32,
}

impl SeverityHistogram {
    /// Increment the bucket for `severity` and the running total.
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        self.total += 1;
    }
}

/// Structured finding location, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// A specific source line.
    File {
        /// Repo-relative path.
        file: String,
        /// 1-indexed line number.
        line: usize,
        /// Redacted/truncated source snippet.
        snippet: String,
    },
    /// A live HTTP endpoint.
    Endpoint {
        /// Full URL probed.
        url: String,
    },
    /// A vulnerable dependency.
    Dependency {
        /// Package name.
        package: String,
        /// Installed version string, as declared.
        version: String,
    },
}

/// One observed security issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Opaque identifier, prefix `fnd`.
    pub id: String,
    /// Owning assessment.
    pub assessment_id: String,
    /// Severity.
    pub severity: Severity,
    /// Short category string, e.g. `sql_injection`.
    pub category: String,
    /// One-line title.
    pub title: String,
    /// 2-3 sentence description.
    pub description: String,
    /// Structured location, if identifiable.
    pub location: Option<Location>,
    /// Free-form supporting evidence.
    pub evidence: Option<serde_json::Value>,
    /// Remediation text.
    pub remediation: String,
    /// Emitting agent name, or `static` for the lightweight pipeline.
    pub agent: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One step of a robust agent's tool-use loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLog {
    /// Opaque identifier, prefix `log`.
    pub id: String,
    /// Owning assessment.
    pub assessment_id: String,
    /// Agent name (`recon`, `auth`, `injection`, `config`).
    pub agent: String,
    /// Monotonically increasing step index within `(assessment, agent)`.
    pub step: u32,
    /// Action description, e.g. `"GET /admin"`.
    pub action: String,
    /// Target path the action concerned.
    pub target: String,
    /// Optional outbound request payload.
    pub payload: Option<String>,
    /// Optional HTTP response code observed.
    pub response_code: Option<u16>,
    /// Truncated response preview.
    pub response_preview: Option<String>,
    /// Short reasoning string the agent attached to this step.
    pub reasoning: String,
    /// Finding this step produced, if any.
    pub finding_id: Option<String>,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Tunnel session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    /// Duplex channel is live.
    Connected,
    /// Client disconnected; record persists for history.
    Disconnected,
}

impl TunnelStatus {
    /// Parse from the lowercase wire/storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(TunnelStatus::Connected),
            "disconnected" => Some(TunnelStatus::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Connected => write!(f, "connected"),
            TunnelStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A duplex channel to a client that relays requests to a private local target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSession {
    /// Opaque identifier, prefix `tun`.
    pub id: String,
    /// Port on the client's machine requests are forwarded to.
    pub target_port: u16,
    /// Current status.
    pub status: TunnelStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat (`pong`) timestamp.
    pub last_heartbeat: DateTime<Utc>,
}

/// A single request to analyze a target, in one of two modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    /// Opaque identifier, prefix `asm`.
    pub id: String,
    /// Lightweight or robust.
    pub mode: Mode,
    /// Lifecycle status.
    pub status: Status,
    /// Lightweight: the repository to clone.
    pub repo_url: Option<String>,
    /// Robust: the live target to probe.
    pub target_url: Option<String>,
    /// Robust: an existing tunnel session to route probes through.
    pub tunnel_session_id: Option<String>,
    /// Robust: ordered list of agent names to run.
    pub agents: Option<Vec<String>>,
    /// Coverage/budget dial.
    pub depth: Depth,
    /// Caller-supplied dedup token, unique when present.
    pub idempotency_key: Option<String>,
    /// Severity counts over this assessment's owned findings.
    pub finding_counts: SeverityHistogram,
    /// Uppercase error code, set only when `status == Failed`.
    pub error_type: Option<String>,
    /// Truncated (<=500 char) error message, set only when `status == Failed`.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set when `status` transitions into a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A lightweight-mode file supplied inline, as an alternative to `repo_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineFile {
    /// Repo-relative path.
    pub path: String,
    /// File content.
    pub content: String,
}

/// Request body for creating a new assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssessmentRequest {
    /// Lightweight or robust.
    pub mode: Mode,
    /// Lightweight: repository URL to shallow-clone.
    pub repo_url: Option<String>,
    /// Lightweight: inline files, alternative to `repo_url`.
    pub files: Option<Vec<InlineFile>>,
    /// Robust: live target to probe.
    pub target_url: Option<String>,
    /// Robust: existing connected tunnel session.
    pub tunnel_session_id: Option<String>,
    /// Robust: agent names to run; defaults to all four when omitted.
    pub agents: Option<Vec<String>>,
    /// Coverage/budget dial; defaults to `standard`.
    pub depth: Option<Depth>,
    /// Caller-supplied idempotency token.
    pub idempotency_key: Option<String>,
}

/// Overrides accepted by `rerun`; `None` fields leave the prior value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerunOverrides {
    /// New idempotency key; only overwrites the prior value when explicitly supplied.
    pub idempotency_key: Option<String>,
    /// New depth.
    pub depth: Option<Depth>,
    /// New agent list (robust only).
    pub agents: Option<Vec<String>>,
}

/// Detected project facts used by the deterministic analyzers.
#[derive(Debug, Clone, Default)]
pub struct ProjectInfo {
    /// Primary language, if identified.
    pub language: Option<String>,
    /// Framework, if identified from a manifest signature.
    pub framework: Option<String>,
    /// Dependency name -> declared version string.
    pub dependencies: std::collections::HashMap<String, String>,
    /// Whether a `.gitignore` was found anywhere in the file set.
    pub has_gitignore: bool,
    /// Non-comment, non-blank lines of the `.gitignore`, if found.
    pub gitignore_entries: Vec<String>,
}

/// A file read into memory for analysis.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Repo-relative path.
    pub path: String,
    /// UTF-8 (lossy) content.
    pub content: String,
}

/// A finding record produced by a deterministic analyzer, prior to persistence
/// (no `id`/`assessment_id`/`agent`/`created_at` yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    /// Severity.
    pub severity: Severity,
    /// Short category string.
    pub category: String,
    /// One-line title.
    pub title: String,
    /// 2-3 sentence description.
    pub description: String,
    /// Structured location, if identifiable.
    pub location: Option<Location>,
    /// Free-form supporting evidence.
    pub evidence: Option<serde_json::Value>,
    /// Remediation text.
    pub remediation: String,
}
