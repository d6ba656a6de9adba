//! Assessment lifecycle: create/list/get/delete/rerun, and the scheduling
//! glue that hands a freshly created or reset assessment off to the
//! lightweight or robust orchestrator as a fire-and-forget background task.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::lightweight::{self, ContextualAnalyzer};
use crate::models::{
    Assessment, CreateAssessmentRequest, Depth, Mode, RerunOverrides, SeverityHistogram, Status,
    TunnelStatus,
};
use crate::persistence::Store;
use crate::{generate_id, Result, VibeCheckError};

/// Lets the coordinator ask whether a tunnel session is actually live in the
/// multiplexer, without taking a dependency on `vibecheck-tunnel` (which
/// itself depends on this crate's data model).
pub trait TunnelLiveness: Send + Sync {
    /// Whether `tunnel_session_id` currently has an open duplex channel.
    fn is_connected(&self, tunnel_session_id: &str) -> bool;
}

/// Implemented by the robust orchestrator, wired in from `vibecheck-agents`.
/// Absent entirely when no LLM API key is configured, matching the
/// `GEMINI_API_KEY_MISSING` precondition.
#[async_trait]
pub trait RobustRunner: Send + Sync {
    /// Run the robust pipeline for `assessment_id` to completion, leaving it
    /// in a terminal status. Must never panic or return an error to the
    /// caller; all failures are recorded on the assessment itself.
    async fn run(
        &self,
        store: Store,
        assessment_id: String,
        target_url: String,
        tunnel_session_id: Option<String>,
        agents: Vec<String>,
        depth: Depth,
    );
}

fn default_agents() -> Vec<String> {
    ["recon", "auth", "injection", "config"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Assessment lifecycle coordinator. Cheap to clone: everything it owns is
/// already reference-counted.
#[derive(Clone)]
pub struct Coordinator {
    store: Store,
    clone_root: PathBuf,
    tunnel_liveness: Option<Arc<dyn TunnelLiveness>>,
    contextual_analyzer: Option<Arc<dyn ContextualAnalyzer>>,
    robust_runner: Option<Arc<dyn RobustRunner>>,
}

impl Coordinator {
    /// Construct a coordinator. `contextual_analyzer` and `robust_runner`
    /// are `None` when no LLM API key is configured; `tunnel_liveness` is
    /// `None` only in tests that never exercise tunnel-backed robust scans.
    pub fn new(
        store: Store,
        clone_root: PathBuf,
        tunnel_liveness: Option<Arc<dyn TunnelLiveness>>,
        contextual_analyzer: Option<Arc<dyn ContextualAnalyzer>>,
        robust_runner: Option<Arc<dyn RobustRunner>>,
    ) -> Self {
        Self {
            store,
            clone_root,
            tunnel_liveness,
            contextual_analyzer,
            robust_runner,
        }
    }

    /// Create a new assessment and schedule its background work.
    pub async fn create(&self, request: CreateAssessmentRequest) -> Result<Assessment> {
        if let Some(key) = request.idempotency_key.clone() {
            if let Some(existing) = self.store.find_by_idempotency_key(&key)? {
                if existing.mode == request.mode {
                    return Ok(existing);
                }
                return Err(VibeCheckError::Conflict {
                    code: "DUPLICATE_IDEMPOTENCY_KEY",
                    message: format!(
                        "idempotency key '{key}' is already bound to a {} assessment",
                        existing.mode
                    ),
                    http_status: 409,
                });
            }
        }

        match request.mode {
            Mode::Lightweight => self.create_lightweight(request).await,
            Mode::Robust => self.create_robust(request).await,
        }
    }

    async fn create_lightweight(&self, request: CreateAssessmentRequest) -> Result<Assessment> {
        let has_repo = request.repo_url.is_some();
        let has_files = request.files.as_ref().is_some_and(|f| !f.is_empty());
        if has_repo == has_files {
            return Err(VibeCheckError::Validation {
                code: "INVALID_SOURCE",
                message: "exactly one of repo_url or files must be provided".to_string(),
                param: Some("repo_url"),
            });
        }

        let now = Utc::now();
        let assessment = Assessment {
            id: generate_id("asm"),
            mode: Mode::Lightweight,
            status: Status::Queued,
            repo_url: request.repo_url.clone(),
            target_url: None,
            tunnel_session_id: None,
            agents: None,
            depth: request.depth.unwrap_or_default(),
            idempotency_key: request.idempotency_key.clone(),
            finding_counts: SeverityHistogram::default(),
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_assessment(&assessment)?;
        info!(assessment_id = %assessment.id, "lightweight assessment created");

        let acquisition = match request.repo_url {
            Some(url) => lightweight::Acquisition::Repo(url),
            None => lightweight::Acquisition::Inline(request.files.unwrap_or_default()),
        };
        self.spawn_lightweight(assessment.id.clone(), acquisition);

        Ok(assessment)
    }

    async fn create_robust(&self, request: CreateAssessmentRequest) -> Result<Assessment> {
        let target_url = request.target_url.clone().ok_or_else(|| VibeCheckError::Validation {
            code: "INVALID_SOURCE",
            message: "target_url is required for robust assessments".to_string(),
            param: Some("target_url"),
        })?;

        if let Some(session_id) = &request.tunnel_session_id {
            let session = self
                .store
                .get_tunnel_session(session_id)?
                .ok_or_else(|| VibeCheckError::Tunnel {
                    code: "TUNNEL_SESSION_NOT_FOUND",
                    message: format!("tunnel session '{session_id}' not found"),
                })?;
            let live = self
                .tunnel_liveness
                .as_ref()
                .is_some_and(|liveness| liveness.is_connected(session_id));
            if session.status != TunnelStatus::Connected || !live {
                return Err(VibeCheckError::Tunnel {
                    code: "TUNNEL_NOT_CONNECTED",
                    message: format!("tunnel session '{session_id}' is not connected"),
                });
            }
        }

        let agents = request.agents.clone().unwrap_or_else(default_agents);
        let now = Utc::now();
        let assessment = Assessment {
            id: generate_id("asm"),
            mode: Mode::Robust,
            status: Status::Queued,
            repo_url: None,
            target_url: Some(target_url),
            tunnel_session_id: request.tunnel_session_id.clone(),
            agents: Some(agents),
            depth: request.depth.unwrap_or_default(),
            idempotency_key: request.idempotency_key.clone(),
            finding_counts: SeverityHistogram::default(),
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_assessment(&assessment)?;
        info!(assessment_id = %assessment.id, "robust assessment created");
        self.spawn_robust(&assessment);

        Ok(assessment)
    }

    /// List assessments, optionally filtered by mode and/or status.
    pub fn list(&self, mode: Option<Mode>, status: Option<Status>) -> Result<Vec<Assessment>> {
        self.store.list_assessments(mode, status)
    }

    /// Fetch a single assessment.
    pub fn get(&self, id: &str) -> Result<Assessment> {
        self.store
            .get_assessment(id)?
            .ok_or_else(|| VibeCheckError::not_found("assessment", id))
    }

    /// Delete an assessment, cascading to its findings and agent logs.
    pub fn delete(&self, id: &str) -> Result<()> {
        if self.store.delete_assessment(id)? {
            Ok(())
        } else {
            Err(VibeCheckError::not_found("assessment", id))
        }
    }

    /// Reset a terminal assessment back to `queued` and re-schedule it.
    /// Matches the source behavior of re-running a lightweight assessment
    /// created from inline files: since their content is never persisted,
    /// the rerun re-acquires only via `repo_url` and otherwise scans an
    /// empty file set.
    pub async fn rerun(&self, id: &str, overrides: RerunOverrides) -> Result<Assessment> {
        let existing = self.get(id)?;
        if !existing.status.is_terminal() {
            return Err(VibeCheckError::Conflict {
                code: "ASSESSMENT_IN_PROGRESS",
                message: format!("assessment '{id}' is still {}", existing.status),
                http_status: 409,
            });
        }

        let depth = overrides.depth.unwrap_or(existing.depth);
        let agents = overrides.agents.clone().or_else(|| existing.agents.clone());
        self.store.reset_for_rerun(
            id,
            depth,
            agents.as_deref(),
            overrides.idempotency_key.as_deref(),
        )?;

        let assessment = self.get(id)?;
        match assessment.mode {
            Mode::Lightweight => {
                let acquisition = match &assessment.repo_url {
                    Some(url) => lightweight::Acquisition::Repo(url.clone()),
                    None => lightweight::Acquisition::Inline(Vec::new()),
                };
                self.spawn_lightweight(assessment.id.clone(), acquisition);
            }
            Mode::Robust => self.spawn_robust(&assessment),
        }

        Ok(assessment)
    }

    fn spawn_lightweight(&self, assessment_id: String, acquisition: lightweight::Acquisition) {
        let store = self.store.clone();
        let clone_root = self.clone_root.clone();
        let analyzer = self.contextual_analyzer.clone();
        tokio::spawn(async move {
            lightweight::run(store, assessment_id, acquisition, clone_root, analyzer).await;
        });
    }

    fn spawn_robust(&self, assessment: &Assessment) {
        let store = self.store.clone();
        let id = assessment.id.clone();

        let Some(runner) = self.robust_runner.clone() else {
            warn!(assessment_id = %id, "robust assessment requested with no LLM API key configured");
            tokio::spawn(async move {
                let _ = store.update_assessment_status(
                    &id,
                    Status::Failed,
                    Some("GEMINI_API_KEY_MISSING"),
                    Some("no LLM API key is configured"),
                    Some(Utc::now()),
                );
            });
            return;
        };

        let target_url = assessment.target_url.clone().unwrap_or_default();
        let tunnel_session_id = assessment.tunnel_session_id.clone();
        let agents = assessment.agents.clone().unwrap_or_else(default_agents);
        let depth = assessment.depth;
        tokio::spawn(async move {
            runner
                .run(store, id, target_url, tunnel_session_id, agents, depth)
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InlineFile;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn coordinator(store: Store) -> Coordinator {
        Coordinator::new(store, PathBuf::from("/tmp/vibecheck-coordinator-tests"), None, None, None)
    }

    #[tokio::test]
    async fn create_lightweight_requires_exactly_one_source() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store);

        let err = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Lightweight,
                repo_url: None,
                files: None,
                target_url: None,
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: None,
            })
            .await
            .expect_err("should reject missing source");
        assert_eq!(err.code(), "INVALID_SOURCE");

        let err = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Lightweight,
                repo_url: Some("https://example.com/a.git".to_string()),
                files: Some(vec![InlineFile {
                    path: "a.txt".to_string(),
                    content: "x".to_string(),
                }]),
                target_url: None,
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: None,
            })
            .await
            .expect_err("should reject both sources");
        assert_eq!(err.code(), "INVALID_SOURCE");
    }

    #[tokio::test]
    async fn idempotent_create_returns_same_assessment_for_matching_mode() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store);

        let request = |key: &str| CreateAssessmentRequest {
            mode: Mode::Lightweight,
            repo_url: Some("https://example.com/a.git".to_string()),
            files: None,
            target_url: None,
            tunnel_session_id: None,
            agents: None,
            depth: None,
            idempotency_key: Some(key.to_string()),
        };

        let first = coord.create(request("k1")).await.expect("first create");
        let second = coord.create(request("k1")).await.expect("second create");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn idempotent_create_conflicts_across_modes() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store);

        coord
            .create(CreateAssessmentRequest {
                mode: Mode::Lightweight,
                repo_url: Some("https://example.com/a.git".to_string()),
                files: None,
                target_url: None,
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: Some("k1".to_string()),
            })
            .await
            .expect("first create");

        let err = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Robust,
                repo_url: None,
                files: None,
                target_url: Some("http://127.0.0.1:1".to_string()),
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: Some("k1".to_string()),
            })
            .await
            .expect_err("should conflict across modes");
        assert_eq!(err.code(), "DUPLICATE_IDEMPOTENCY_KEY");
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn robust_without_runner_fails_with_missing_key() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store.clone());

        let assessment = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Robust,
                repo_url: None,
                files: None,
                target_url: Some("http://127.0.0.1:1".to_string()),
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: None,
            })
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fetched = store.get_assessment(&assessment.id).expect("query").expect("found");
        assert_eq!(fetched.status, Status::Failed);
        assert_eq!(fetched.error_type.as_deref(), Some("GEMINI_API_KEY_MISSING"));
    }

    #[tokio::test]
    async fn rerun_rejects_in_progress_assessment() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store.clone());

        let assessment = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Lightweight,
                repo_url: None,
                files: Some(vec![InlineFile {
                    path: "a.txt".to_string(),
                    content: "x".to_string(),
                }]),
                target_url: None,
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: None,
            })
            .await
            .expect("create");

        store
            .update_assessment_status(&assessment.id, Status::Analyzing, None, None, None)
            .expect("force in-progress");

        let err = coord
            .rerun(&assessment.id, RerunOverrides::default())
            .await
            .expect_err("should reject rerun while in progress");
        assert_eq!(err.code(), "ASSESSMENT_IN_PROGRESS");
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn rerun_preserves_idempotency_key_when_not_overridden() {
        let store = Store::open_in_memory().expect("open store");
        let coord = coordinator(store.clone());

        let assessment = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Lightweight,
                repo_url: None,
                files: Some(vec![InlineFile {
                    path: "a.txt".to_string(),
                    content: "x".to_string(),
                }]),
                target_url: None,
                tunnel_session_id: None,
                agents: None,
                depth: None,
                idempotency_key: Some("keep-me".to_string()),
            })
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(50)).await;

        let rerun = coord
            .rerun(&assessment.id, RerunOverrides::default())
            .await
            .expect("rerun");
        assert_eq!(rerun.idempotency_key.as_deref(), Some("keep-me"));
    }

    struct FlagLiveness(AtomicBool);

    impl TunnelLiveness for FlagLiveness {
        fn is_connected(&self, _tunnel_session_id: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn robust_rejects_disconnected_tunnel_session() {
        let store = Store::open_in_memory().expect("open store");
        let session = crate::models::TunnelSession {
            id: "tun_1".to_string(),
            target_port: 3000,
            status: TunnelStatus::Connected,
            created_at: Utc::now(),
            last_heartbeat: Utc::now(),
        };
        store.insert_tunnel_session(&session).expect("insert session");

        let coord = Coordinator::new(
            store,
            PathBuf::from("/tmp/vibecheck-coordinator-tests"),
            Some(Arc::new(FlagLiveness(AtomicBool::new(false)))),
            None,
            None,
        );

        let err = coord
            .create(CreateAssessmentRequest {
                mode: Mode::Robust,
                repo_url: None,
                files: None,
                target_url: Some("http://127.0.0.1:1".to_string()),
                tunnel_session_id: Some("tun_1".to_string()),
                agents: None,
                depth: None,
                idempotency_key: None,
            })
            .await
            .expect_err("should reject not-live tunnel");
        assert_eq!(err.code(), "TUNNEL_NOT_CONNECTED");
    }
}
