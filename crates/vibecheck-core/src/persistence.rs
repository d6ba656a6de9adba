//! SQLite-backed durable store for assessments, findings, agent logs, and
//! tunnel sessions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::models::{
    AgentLog, Assessment, Depth, Finding, Location, Mode, SeverityHistogram, Status,
    TunnelSession, TunnelStatus,
};
use crate::{Result, VibeCheckError};

impl From<rusqlite::Error> for VibeCheckError {
    fn from(err: rusqlite::Error) -> Self {
        VibeCheckError::Database(err.to_string())
    }
}

/// Durable store backing the assessment coordinator and the tunnel multiplexer.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path` and run schema
    /// migrations. `path` is typically `DATABASE_URL` with any `sqlite://`
    /// prefix already stripped by the caller.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening persistence store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute("PRAGMA journal_mode=WAL;", [])?;
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS assessments (
                id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                repo_url TEXT,
                target_url TEXT,
                tunnel_session_id TEXT,
                agents_json TEXT,
                depth TEXT NOT NULL,
                idempotency_key TEXT,
                severity_critical INTEGER NOT NULL DEFAULT 0,
                severity_high INTEGER NOT NULL DEFAULT 0,
                severity_medium INTEGER NOT NULL DEFAULT 0,
                severity_low INTEGER NOT NULL DEFAULT 0,
                severity_info INTEGER NOT NULL DEFAULT 0,
                finding_total INTEGER NOT NULL DEFAULT 0,
                error_type TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_assessments_idempotency_key
             ON assessments(idempotency_key) WHERE idempotency_key IS NOT NULL",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS findings (
                id TEXT PRIMARY KEY,
                assessment_id TEXT NOT NULL REFERENCES assessments(id) ON DELETE CASCADE,
                severity TEXT NOT NULL,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                location_json TEXT,
                evidence_json TEXT,
                remediation TEXT NOT NULL,
                agent TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_findings_assessment ON findings(assessment_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_logs (
                id TEXT PRIMARY KEY,
                assessment_id TEXT NOT NULL REFERENCES assessments(id) ON DELETE CASCADE,
                agent TEXT NOT NULL,
                step INTEGER NOT NULL,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                payload TEXT,
                response_code INTEGER,
                response_preview TEXT,
                reasoning TEXT NOT NULL,
                finding_id TEXT,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_logs_assessment ON agent_logs(assessment_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tunnel_sessions (
                id TEXT PRIMARY KEY,
                target_port INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    // -- assessments ---------------------------------------------------

    /// Insert a newly created assessment.
    pub fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
        let conn = self.lock()?;
        let agents_json = assessment
            .agents
            .as_ref()
            .map(|a| serde_json::to_string(a))
            .transpose()
            .map_err(|e| VibeCheckError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO assessments (
                id, mode, status, repo_url, target_url, tunnel_session_id, agents_json,
                depth, idempotency_key, severity_critical, severity_high, severity_medium,
                severity_low, severity_info, finding_total, error_type, error_message,
                created_at, updated_at, completed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            params![
                assessment.id,
                assessment.mode.to_string(),
                assessment.status.to_string(),
                assessment.repo_url,
                assessment.target_url,
                assessment.tunnel_session_id,
                agents_json,
                assessment.depth.to_string(),
                assessment.idempotency_key,
                assessment.finding_counts.critical,
                assessment.finding_counts.high,
                assessment.finding_counts.medium,
                assessment.finding_counts.low,
                assessment.finding_counts.info,
                assessment.finding_counts.total,
                assessment.error_type,
                assessment.error_message,
                to_rfc3339(assessment.created_at),
                to_rfc3339(assessment.updated_at),
                assessment.completed_at.map(to_rfc3339),
            ],
        )?;
        debug!(assessment_id = %assessment.id, "assessment inserted");
        Ok(())
    }

    /// Fetch an assessment by id.
    pub fn get_assessment(&self, id: &str) -> Result<Option<Assessment>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM assessments WHERE id = ?1",
            params![id],
            row_to_assessment,
        )
        .optional()
        .map_err(VibeCheckError::from)
    }

    /// Look up an assessment by idempotency key, regardless of mode.
    pub fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Assessment>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM assessments WHERE idempotency_key = ?1",
            params![key],
            row_to_assessment,
        )
        .optional()
        .map_err(VibeCheckError::from)
    }

    /// List assessments, optionally filtered by mode and/or status, newest first.
    pub fn list_assessments(
        &self,
        mode: Option<Mode>,
        status: Option<Status>,
    ) -> Result<Vec<Assessment>> {
        let conn = self.lock()?;
        let mut sql = "SELECT * FROM assessments WHERE 1=1".to_string();
        if mode.is_some() {
            sql.push_str(" AND mode = ?1");
        }
        if status.is_some() {
            sql.push_str(if mode.is_some() { " AND status = ?2" } else { " AND status = ?1" });
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match (mode, status) {
            (Some(m), Some(s)) => {
                stmt.query_map(params![m.to_string(), s.to_string()], row_to_assessment)?
            }
            (Some(m), None) => stmt.query_map(params![m.to_string()], row_to_assessment)?,
            (None, Some(s)) => stmt.query_map(params![s.to_string()], row_to_assessment)?,
            (None, None) => stmt.query_map([], row_to_assessment)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(VibeCheckError::from)
    }

    /// Update status, completion timestamp, and terminal error fields.
    pub fn update_assessment_status(
        &self,
        id: &str,
        status: Status,
        error_type: Option<&str>,
        error_message: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE assessments SET status=?1, error_type=?2, error_message=?3,
             completed_at=?4, updated_at=?5 WHERE id=?6",
            params![
                status.to_string(),
                error_type,
                error_message,
                completed_at.map(to_rfc3339),
                to_rfc3339(Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the severity histogram, e.g. after the lightweight pipeline
    /// finishes persisting findings or the robust orchestrator's reduce step.
    pub fn update_assessment_histogram(&self, id: &str, histogram: &SeverityHistogram) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE assessments SET severity_critical=?1, severity_high=?2, severity_medium=?3,
             severity_low=?4, severity_info=?5, finding_total=?6, updated_at=?7 WHERE id=?8",
            params![
                histogram.critical,
                histogram.high,
                histogram.medium,
                histogram.low,
                histogram.info,
                histogram.total,
                to_rfc3339(Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    /// Apply `rerun` overrides (depth/agents/idempotency key) and reset the
    /// assessment back to `queued` with a fresh histogram.
    pub fn reset_for_rerun(
        &self,
        id: &str,
        depth: Depth,
        agents: Option<&[String]>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let agents_json = agents
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VibeCheckError::Serialization(e.to_string()))?;
        conn.execute(
            "UPDATE assessments SET status='queued', depth=?1, agents_json=?2,
             idempotency_key=COALESCE(?3, idempotency_key),
             severity_critical=0, severity_high=0, severity_medium=0, severity_low=0,
             severity_info=0, finding_total=0, error_type=NULL, error_message=NULL,
             completed_at=NULL, updated_at=?4 WHERE id=?5",
            params![depth.to_string(), agents_json, idempotency_key, to_rfc3339(Utc::now()), id],
        )?;
        conn.execute("DELETE FROM findings WHERE assessment_id = ?1", params![id])?;
        conn.execute("DELETE FROM agent_logs WHERE assessment_id = ?1", params![id])?;
        Ok(())
    }

    /// Delete an assessment and cascade to its findings and agent logs.
    pub fn delete_assessment(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM assessments WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // -- findings --------------------------------------------------------

    /// Persist a finding.
    pub fn insert_finding(&self, finding: &Finding) -> Result<()> {
        let conn = self.lock()?;
        let location_json = finding
            .location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VibeCheckError::Serialization(e.to_string()))?;
        let evidence_json = finding
            .evidence
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VibeCheckError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO findings (
                id, assessment_id, severity, category, title, description,
                location_json, evidence_json, remediation, agent, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                finding.id,
                finding.assessment_id,
                finding.severity.to_string(),
                finding.category,
                finding.title,
                finding.description,
                location_json,
                evidence_json,
                finding.remediation,
                finding.agent,
                to_rfc3339(finding.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single finding owned by `assessment_id`.
    pub fn get_finding(&self, assessment_id: &str, finding_id: &str) -> Result<Option<Finding>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM findings WHERE assessment_id = ?1 AND id = ?2",
            params![assessment_id, finding_id],
            row_to_finding,
        )
        .optional()
        .map_err(VibeCheckError::from)
    }

    /// List findings owned by `assessment_id`, optionally filtered by
    /// severity/category/agent, ordered by severity rank then creation time
    /// when `sort_by_severity` is set, else by creation time.
    pub fn list_findings(
        &self,
        assessment_id: &str,
        severity: Option<&str>,
        category: Option<&str>,
        agent: Option<&str>,
        sort_by_severity: bool,
    ) -> Result<Vec<Finding>> {
        let conn = self.lock()?;
        let mut sql = "SELECT * FROM findings WHERE assessment_id = ?1".to_string();
        let mut binds: Vec<String> = vec![assessment_id.to_string()];
        if let Some(s) = severity {
            binds.push(s.to_string());
            sql.push_str(&format!(" AND severity = ?{}", binds.len()));
        }
        if let Some(c) = category {
            binds.push(c.to_string());
            sql.push_str(&format!(" AND category = ?{}", binds.len()));
        }
        if let Some(a) = agent {
            binds.push(a.to_string());
            sql.push_str(&format!(" AND agent = ?{}", binds.len()));
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            binds.iter().map(|b| b as &dyn rusqlite::ToSql).collect();
        let mut findings = stmt
            .query_map(params.as_slice(), row_to_finding)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if sort_by_severity {
            findings.sort_by(|a, b| {
                b.severity
                    .rank()
                    .cmp(&a.severity.rank())
                    .then(a.created_at.cmp(&b.created_at))
            });
        }
        Ok(findings)
    }

    /// Severity counts grouped over an assessment's findings, with the
    /// running total — used by the robust orchestrator's reduce step.
    pub fn severity_counts(&self, assessment_id: &str) -> Result<SeverityHistogram> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM findings WHERE assessment_id = ?1 GROUP BY severity",
        )?;
        let mut histogram = SeverityHistogram::default();
        let rows = stmt.query_map(params![assessment_id], |row| {
            let severity: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((severity, count))
        })?;
        for row in rows {
            let (severity, count) = row?;
            match severity.as_str() {
                "critical" => histogram.critical = count,
                "high" => histogram.high = count,
                "medium" => histogram.medium = count,
                "low" => histogram.low = count,
                "info" => histogram.info = count,
                _ => {}
            }
        }
        histogram.total =
            histogram.critical + histogram.high + histogram.medium + histogram.low + histogram.info;
        Ok(histogram)
    }

    // -- agent logs --------------------------------------------------------

    /// Append an agent log row.
    pub fn insert_agent_log(&self, log: &AgentLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_logs (
                id, assessment_id, agent, step, action, target, payload,
                response_code, response_preview, reasoning, finding_id, timestamp
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                log.id,
                log.assessment_id,
                log.agent,
                log.step,
                log.action,
                log.target,
                log.payload,
                log.response_code,
                log.response_preview,
                log.reasoning,
                log.finding_id,
                to_rfc3339(log.timestamp),
            ],
        )?;
        Ok(())
    }

    /// The highest `step` recorded so far for `(assessment, agent)`, or 0 if none.
    pub fn max_agent_step(&self, assessment_id: &str, agent: &str) -> Result<u32> {
        let conn = self.lock()?;
        let max: Option<u32> = conn.query_row(
            "SELECT MAX(step) FROM agent_logs WHERE assessment_id = ?1 AND agent = ?2",
            params![assessment_id, agent],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// List agent logs owned by `assessment_id`, ordered by timestamp.
    pub fn list_agent_logs(&self, assessment_id: &str) -> Result<Vec<AgentLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_logs WHERE assessment_id = ?1 ORDER BY timestamp ASC",
        )?;
        stmt.query_map(params![assessment_id], row_to_agent_log)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(VibeCheckError::from)
    }

    /// Delete every finding and agent-log row a single agent wrote for an
    /// assessment. Each write in the robust loop autocommits individually
    /// (no surrounding DB transaction), so a failed agent's partial work is
    /// unwound by deleting it explicitly rather than rolling back.
    pub fn discard_agent_data(&self, assessment_id: &str, agent: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM findings WHERE assessment_id = ?1 AND agent = ?2",
            params![assessment_id, agent],
        )?;
        conn.execute(
            "DELETE FROM agent_logs WHERE assessment_id = ?1 AND agent = ?2",
            params![assessment_id, agent],
        )?;
        Ok(())
    }

    // -- tunnel sessions --------------------------------------------------------

    /// Insert a newly registered tunnel session.
    pub fn insert_tunnel_session(&self, session: &TunnelSession) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tunnel_sessions (id, target_port, status, created_at, last_heartbeat)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                session.id,
                session.target_port,
                session.status.to_string(),
                to_rfc3339(session.created_at),
                to_rfc3339(session.last_heartbeat),
            ],
        )?;
        Ok(())
    }

    /// Fetch a tunnel session by id.
    pub fn get_tunnel_session(&self, id: &str) -> Result<Option<TunnelSession>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM tunnel_sessions WHERE id = ?1",
            params![id],
            row_to_tunnel_session,
        )
        .optional()
        .map_err(VibeCheckError::from)
    }

    /// List all tunnel sessions, newest first.
    pub fn list_tunnel_sessions(&self) -> Result<Vec<TunnelSession>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT * FROM tunnel_sessions ORDER BY created_at DESC")?;
        stmt.query_map([], row_to_tunnel_session)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(VibeCheckError::from)
    }

    /// Mark a session disconnected (the client dropped the WebSocket).
    pub fn mark_tunnel_disconnected(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tunnel_sessions SET status = 'disconnected' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Bump a session's `last_heartbeat` to now, on receipt of a `pong`.
    pub fn touch_tunnel_heartbeat(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tunnel_sessions SET last_heartbeat = ?1 WHERE id = ?2",
            params![to_rfc3339(Utc::now()), id],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VibeCheckError::Database("store mutex poisoned".to_string()))
    }
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_assessment(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    let mode: String = row.get("mode")?;
    let status: String = row.get("status")?;
    let depth: String = row.get("depth")?;
    let agents_json: Option<String> = row.get("agents_json")?;
    let agents = agents_json
        .map(|s| serde_json::from_str::<Vec<String>>(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(Assessment {
        id: row.get("id")?,
        mode: Mode::parse(&mode).unwrap_or(Mode::Lightweight),
        status: Status::parse(&status).unwrap_or(Status::Failed),
        repo_url: row.get("repo_url")?,
        target_url: row.get("target_url")?,
        tunnel_session_id: row.get("tunnel_session_id")?,
        agents,
        depth: Depth::parse(&depth).unwrap_or_default(),
        idempotency_key: row.get("idempotency_key")?,
        finding_counts: SeverityHistogram {
            critical: row.get("severity_critical")?,
            high: row.get("severity_high")?,
            medium: row.get("severity_medium")?,
            low: row.get("severity_low")?,
            info: row.get("severity_info")?,
            total: row.get("finding_total")?,
        },
        error_type: row.get("error_type")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        completed_at: completed_at.map(|s| parse_ts(&s)).transpose()?,
    })
}

fn row_to_finding(row: &Row<'_>) -> rusqlite::Result<Finding> {
    let severity: String = row.get("severity")?;
    let location_json: Option<String> = row.get("location_json")?;
    let evidence_json: Option<String> = row.get("evidence_json")?;
    let created_at: String = row.get("created_at")?;

    let location = location_json
        .map(|s| serde_json::from_str::<Location>(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let evidence = evidence_json
        .map(|s| serde_json::from_str::<serde_json::Value>(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Finding {
        id: row.get("id")?,
        assessment_id: row.get("assessment_id")?,
        severity: crate::models::Severity::parse(&severity)
            .unwrap_or(crate::models::Severity::Info),
        category: row.get("category")?,
        title: row.get("title")?,
        description: row.get("description")?,
        location,
        evidence,
        remediation: row.get("remediation")?,
        agent: row.get("agent")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_agent_log(row: &Row<'_>) -> rusqlite::Result<AgentLog> {
    let timestamp: String = row.get("timestamp")?;
    Ok(AgentLog {
        id: row.get("id")?,
        assessment_id: row.get("assessment_id")?,
        agent: row.get("agent")?,
        step: row.get("step")?,
        action: row.get("action")?,
        target: row.get("target")?,
        payload: row.get("payload")?,
        response_code: row.get("response_code")?,
        response_preview: row.get("response_preview")?,
        reasoning: row.get("reasoning")?,
        finding_id: row.get("finding_id")?,
        timestamp: parse_ts(&timestamp)?,
    })
}

fn row_to_tunnel_session(row: &Row<'_>) -> rusqlite::Result<TunnelSession> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let last_heartbeat: String = row.get("last_heartbeat")?;
    Ok(TunnelSession {
        id: row.get("id")?,
        target_port: row.get("target_port")?,
        status: TunnelStatus::parse(&status).unwrap_or(TunnelStatus::Disconnected),
        created_at: parse_ts(&created_at)?,
        last_heartbeat: parse_ts(&last_heartbeat)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Depth, Mode, Severity, Status};

    fn sample_assessment(id: &str, idempotency_key: Option<&str>) -> Assessment {
        let now = Utc::now();
        Assessment {
            id: id.to_string(),
            mode: Mode::Lightweight,
            status: Status::Queued,
            repo_url: Some("https://example.com/repo.git".to_string()),
            target_url: None,
            tunnel_session_id: None,
            agents: None,
            depth: Depth::Standard,
            idempotency_key: idempotency_key.map(str::to_string),
            finding_counts: SeverityHistogram::default(),
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn round_trips_an_assessment() {
        let store = Store::open_in_memory().expect("open store");
        let assessment = sample_assessment("asm_1", Some("k1"));
        store.insert_assessment(&assessment).expect("insert");

        let fetched = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(fetched.id, "asm_1");
        assert_eq!(fetched.mode, Mode::Lightweight);
        assert_eq!(fetched.idempotency_key.as_deref(), Some("k1"));
    }

    #[test]
    fn idempotency_key_is_unique() {
        let store = Store::open_in_memory().expect("open store");
        store
            .insert_assessment(&sample_assessment("asm_1", Some("dup")))
            .expect("first insert");
        let result = store.insert_assessment(&sample_assessment("asm_2", Some("dup")));
        assert!(result.is_err());
    }

    #[test]
    fn deleting_assessment_cascades_to_findings() {
        let store = Store::open_in_memory().expect("open store");
        store
            .insert_assessment(&sample_assessment("asm_1", None))
            .expect("insert assessment");

        let finding = Finding {
            id: "fnd_1".to_string(),
            assessment_id: "asm_1".to_string(),
            severity: Severity::High,
            category: "test".to_string(),
            title: "title".to_string(),
            description: "description".to_string(),
            location: None,
            evidence: None,
            remediation: "fix it".to_string(),
            agent: "static".to_string(),
            created_at: Utc::now(),
        };
        store.insert_finding(&finding).expect("insert finding");

        store.delete_assessment("asm_1").expect("delete");
        assert!(store.get_finding("asm_1", "fnd_1").expect("query").is_none());
    }

    #[test]
    fn severity_counts_reflect_inserted_findings() {
        let store = Store::open_in_memory().expect("open store");
        store
            .insert_assessment(&sample_assessment("asm_1", None))
            .expect("insert assessment");

        for (i, severity) in [Severity::Critical, Severity::Critical, Severity::Low]
            .into_iter()
            .enumerate()
        {
            store
                .insert_finding(&Finding {
                    id: format!("fnd_{i}"),
                    assessment_id: "asm_1".to_string(),
                    severity,
                    category: "test".to_string(),
                    title: "title".to_string(),
                    description: "description".to_string(),
                    location: None,
                    evidence: None,
                    remediation: "fix it".to_string(),
                    agent: "static".to_string(),
                    created_at: Utc::now(),
                })
                .expect("insert finding");
        }

        let histogram = store.severity_counts("asm_1").expect("counts");
        assert_eq!(histogram.critical, 2);
        assert_eq!(histogram.low, 1);
        assert_eq!(histogram.total, 3);
    }

    #[test]
    fn rerun_clears_findings_and_resets_status() {
        let store = Store::open_in_memory().expect("open store");
        let mut assessment = sample_assessment("asm_1", Some("k1"));
        assessment.status = Status::Complete;
        store.insert_assessment(&assessment).expect("insert");
        store
            .insert_finding(&Finding {
                id: "fnd_1".to_string(),
                assessment_id: "asm_1".to_string(),
                severity: Severity::Medium,
                category: "test".to_string(),
                title: "title".to_string(),
                description: "description".to_string(),
                location: None,
                evidence: None,
                remediation: "fix it".to_string(),
                agent: "static".to_string(),
                created_at: Utc::now(),
            })
            .expect("insert finding");

        store
            .reset_for_rerun("asm_1", Depth::Deep, None, None)
            .expect("rerun reset");

        let fetched = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(fetched.status, Status::Queued);
        assert_eq!(fetched.depth, Depth::Deep);
        assert_eq!(fetched.idempotency_key.as_deref(), Some("k1"));
        assert_eq!(fetched.finding_counts.total, 0);
        assert!(store.list_findings("asm_1", None, None, None, false).expect("list").is_empty());
    }

    #[test]
    fn agent_log_steps_increase_monotonically() {
        let store = Store::open_in_memory().expect("open store");
        store
            .insert_assessment(&sample_assessment("asm_1", None))
            .expect("insert");

        for step in 1..=3u32 {
            store
                .insert_agent_log(&AgentLog {
                    id: format!("log_{step}"),
                    assessment_id: "asm_1".to_string(),
                    agent: "recon".to_string(),
                    step,
                    action: "GET /".to_string(),
                    target: "/".to_string(),
                    payload: None,
                    response_code: Some(200),
                    response_preview: None,
                    reasoning: "probing root".to_string(),
                    finding_id: None,
                    timestamp: Utc::now(),
                })
                .expect("insert log");
        }

        assert_eq!(store.max_agent_step("asm_1", "recon").expect("max"), 3);
        let logs = store.list_agent_logs("asm_1").expect("list");
        assert_eq!(logs.len(), 3);
        assert!(logs.windows(2).all(|w| w[0].step < w[1].step));
    }
}
