//! Lightweight scan pipeline: acquire files, detect project facts, run the
//! four deterministic analyzers, and optionally append an LLM contextual
//! pass. Always leaves its assessment in a terminal status.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument};

use crate::analyzers::{config, dependency, pattern, secret};
use crate::models::{InlineFile, ProjectInfo, RawFinding, ScannedFile, SeverityHistogram, Status};
use crate::persistence::Store;
use crate::{generate_id, repo, Finding, Result, VibeCheckError};

/// Implemented by the LLM-backed contextual analyzer. Kept as a trait here
/// (rather than a hard dependency on `vibecheck-llm`) because that crate
/// depends on this one for the data model — an `Option<Arc<dyn
/// ContextualAnalyzer>>` is wired in by whichever crate constructs both.
#[async_trait]
pub trait ContextualAnalyzer: Send + Sync {
    /// Produce supplemental findings from file content and detected project
    /// facts. Must never fail the caller: on any internal error (vendor
    /// failure, malformed response), return an empty vector rather than
    /// propagating it.
    async fn analyze(&self, files: &[ScannedFile], project_info: &ProjectInfo) -> Vec<RawFinding>;
}

/// Where an assessment's source files come from.
pub enum Acquisition {
    /// Shallow-clone this repository URL.
    Repo(String),
    /// Use these inline files directly; no clone, no cleanup.
    Inline(Vec<InlineFile>),
}

/// Run the lightweight pipeline for `assessment_id` to completion. Intended
/// to be spawned as a background task immediately after
/// [`crate::Coordinator::create`] returns its `queued` assessment.
#[instrument(skip(store, acquisition, contextual_analyzer))]
pub async fn run(
    store: Store,
    assessment_id: String,
    acquisition: Acquisition,
    clone_root: PathBuf,
    contextual_analyzer: Option<Arc<dyn ContextualAnalyzer>>,
) {
    match run_inner(&store, &assessment_id, acquisition, &clone_root, contextual_analyzer).await {
        Ok(()) => {
            let _ = store.update_assessment_status(
                &assessment_id,
                Status::Complete,
                None,
                None,
                Some(Utc::now()),
            );
            info!(assessment_id = %assessment_id, "lightweight scan complete");
        }
        Err(err) => {
            error!(assessment_id = %assessment_id, error = %err, "lightweight scan failed");
            let _ = store.update_assessment_status(
                &assessment_id,
                Status::Failed,
                Some(err.code().as_str()),
                Some(err.truncated_message().as_str()),
                Some(Utc::now()),
            );
        }
    }
}

async fn run_inner(
    store: &Store,
    assessment_id: &str,
    acquisition: Acquisition,
    clone_root: &PathBuf,
    contextual_analyzer: Option<Arc<dyn ContextualAnalyzer>>,
) -> Result<()> {
    let mut cloned_dir: Option<PathBuf> = None;

    let files = match acquisition {
        Acquisition::Repo(url) => {
            store.update_assessment_status(assessment_id, Status::Cloning, None, None, None)?;

            let target = clone_root.join(assessment_id);
            let dir = vibecheck_git::clone_shallow(&url, &target)
                .await
                .map_err(|e| VibeCheckError::External {
                    code: "CLONE_FAILED",
                    message: e.to_string(),
                })?;
            cloned_dir = Some(dir.clone());
            repo::scan_files(&dir)?
        }
        Acquisition::Inline(files) => repo::filter_inline_files(files),
    };

    store.update_assessment_status(assessment_id, Status::Analyzing, None, None, None)?;

    let analysis_result = analyze_and_persist(store, assessment_id, &files, contextual_analyzer).await;

    if let Some(dir) = cloned_dir {
        repo::cleanup_clone(&dir).await;
    }

    analysis_result
}

async fn analyze_and_persist(
    store: &Store,
    assessment_id: &str,
    files: &[ScannedFile],
    contextual_analyzer: Option<Arc<dyn ContextualAnalyzer>>,
) -> Result<()> {
    let project_info = repo::detect_project_info(files);

    let mut raw: Vec<RawFinding> = Vec::new();
    raw.extend(dependency::scan(&project_info));
    raw.extend(pattern::scan(files));
    raw.extend(secret::scan(files));
    raw.extend(config::scan(files, &project_info));

    if let Some(analyzer) = contextual_analyzer {
        raw.extend(analyzer.analyze(files, &project_info).await);
    }

    let mut histogram = SeverityHistogram::default();
    for raw_finding in raw {
        histogram.record(raw_finding.severity);
        let finding = Finding {
            id: generate_id("fnd"),
            assessment_id: assessment_id.to_string(),
            severity: raw_finding.severity,
            category: raw_finding.category,
            title: raw_finding.title,
            description: raw_finding.description,
            location: raw_finding.location,
            evidence: raw_finding.evidence,
            remediation: raw_finding.remediation,
            agent: "static".to_string(),
            created_at: Utc::now(),
        };
        store.insert_finding(&finding)?;
    }
    store.update_assessment_histogram(assessment_id, &histogram)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;

    struct StubAnalyzer(Vec<RawFinding>);

    #[async_trait]
    impl ContextualAnalyzer for StubAnalyzer {
        async fn analyze(&self, _files: &[ScannedFile], _project_info: &ProjectInfo) -> Vec<RawFinding> {
            self.0.clone()
        }
    }

    fn sample_assessment(id: &str) -> crate::models::Assessment {
        let now = Utc::now();
        crate::models::Assessment {
            id: id.to_string(),
            mode: Mode::Lightweight,
            status: Status::Queued,
            repo_url: None,
            target_url: None,
            tunnel_session_id: None,
            agents: None,
            depth: crate::models::Depth::Standard,
            idempotency_key: None,
            finding_counts: SeverityHistogram::default(),
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn inline_files_pipeline_reaches_complete_with_findings() {
        let store = Store::open_in_memory().expect("open store");
        store.insert_assessment(&sample_assessment("asm_1")).expect("insert");

        let files = vec![InlineFile {
            path: "package.json".to_string(),
            content: r#"{"dependencies": {"lodash": "4.17.20"}}"#.to_string(),
        }];

        run(
            store.clone(),
            "asm_1".to_string(),
            Acquisition::Inline(files),
            PathBuf::from("/tmp/unused"),
            None,
        )
        .await;

        let assessment = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(assessment.status, Status::Complete);
        assert!(assessment.finding_counts.total >= 1);
    }

    #[tokio::test]
    async fn contextual_analyzer_findings_are_appended() {
        let store = Store::open_in_memory().expect("open store");
        store.insert_assessment(&sample_assessment("asm_1")).expect("insert");

        let contextual = Arc::new(StubAnalyzer(vec![RawFinding {
            severity: crate::models::Severity::Medium,
            category: "business_logic".to_string(),
            title: "Suspicious auth bypass".to_string(),
            description: "An LLM-identified issue.".to_string(),
            location: None,
            evidence: None,
            remediation: "Review the logic.".to_string(),
        }]));

        run(
            store.clone(),
            "asm_1".to_string(),
            Acquisition::Inline(vec![]),
            PathBuf::from("/tmp/unused"),
            Some(contextual),
        )
        .await;

        let assessment = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(assessment.finding_counts.medium, 1);
    }

    #[tokio::test]
    async fn clone_failure_marks_assessment_failed() {
        let store = Store::open_in_memory().expect("open store");
        store.insert_assessment(&sample_assessment("asm_1")).expect("insert");

        run(
            store.clone(),
            "asm_1".to_string(),
            Acquisition::Repo("not-a-real-url".to_string()),
            PathBuf::from("/tmp/vibecheck-test-clone-root"),
            None,
        )
        .await;

        let assessment = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(assessment.status, Status::Failed);
        assert_eq!(assessment.error_type.as_deref(), Some("CLONE_FAILED"));
    }
}
