//! The robust orchestrator: health-check the target, build a coverage map,
//! run each requested agent's tool-use loop, and reduce to a terminal
//! assessment status. A single agent's failure never aborts the assessment;
//! its partial persistence is rolled back and the run continues.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use vibecheck_core::coordinator::RobustRunner;
use vibecheck_core::{Depth, Status, Store};
use vibecheck_llm::OpenAIClient;
use vibecheck_tunnel::TunnelManager;

use crate::coverage::build_coverage;
use crate::http_probe::Prober;
use crate::{agent_loop, prompts};

/// Implements [`RobustRunner`] using a Gemini-credentialed chat client and
/// the tool registry/coverage builder/agent prompts in this crate.
pub struct RobustOrchestrator {
    client: OpenAIClient,
    tunnel_manager: Arc<TunnelManager>,
}

impl RobustOrchestrator {
    /// Wrap an already-constructed LLM client and the shared tunnel
    /// multiplexer. Construct this only when an LLM API key is configured;
    /// its absence is the `GEMINI_API_KEY_MISSING` precondition, handled by
    /// the caller never wiring a [`RobustRunner`] into the coordinator.
    pub fn new(client: OpenAIClient, tunnel_manager: Arc<TunnelManager>) -> Self {
        Self { client, tunnel_manager }
    }

    fn prober(&self, tunnel_session_id: &Option<String>) -> Prober {
        match tunnel_session_id {
            Some(session_id) => Prober::Tunnel {
                manager: self.tunnel_manager.clone(),
                session_id: session_id.clone(),
            },
            None => Prober::Direct,
        }
    }
}

#[async_trait]
impl RobustRunner for RobustOrchestrator {
    #[instrument(skip(self, store), fields(assessment_id = %assessment_id))]
    async fn run(
        &self,
        store: Store,
        assessment_id: String,
        target_url: String,
        tunnel_session_id: Option<String>,
        agents: Vec<String>,
        depth: Depth,
    ) {
        let prober = self.prober(&tunnel_session_id);

        if let Err(err) = store.update_assessment_status(&assessment_id, Status::Scanning, None, None, None) {
            error!(assessment_id = %assessment_id, error = %err, "failed to mark assessment scanning");
            return;
        }

        let health = prober.request(&target_url, "GET", "/", None, None).await;
        if health.get("error").is_some() {
            let message = health
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("target did not respond to a health check")
                .to_string();
            warn!(assessment_id = %assessment_id, target_url, "robust target unreachable");
            let _ = store.update_assessment_status(
                &assessment_id,
                Status::Failed,
                Some("TARGET_UNREACHABLE"),
                Some(&message),
                Some(Utc::now()),
            );
            return;
        }

        let coverage = build_coverage(&prober, &target_url, depth).await;
        info!(
            assessment_id = %assessment_id,
            probed = coverage.probed_count,
            reachable = coverage.reachable_paths.len(),
            "coverage crawl complete, starting agents"
        );

        let mut failures: Vec<(String, String)> = Vec::new();
        let mut succeeded = 0usize;

        for agent_name in &agents {
            if prompts::system_prompt_for(agent_name).is_none() {
                warn!(assessment_id = %assessment_id, agent = agent_name, "skipping unrecognized agent");
                continue;
            }

            let result = agent_loop::run_agent(
                agent_name,
                &self.client,
                &store,
                &assessment_id,
                &target_url,
                depth,
                &coverage,
                &prober,
            )
            .await;

            match result {
                Ok(findings) => {
                    succeeded += 1;
                    info!(assessment_id = %assessment_id, agent = agent_name, findings, "agent finished");
                }
                Err(err) => {
                    warn!(assessment_id = %assessment_id, agent = agent_name, error = %err, "agent failed, rolling back its data");
                    if let Err(rollback_err) = store.discard_agent_data(&assessment_id, agent_name) {
                        error!(assessment_id = %assessment_id, agent = agent_name, error = %rollback_err, "failed to roll back agent data");
                    }
                    failures.push((agent_name.clone(), err.truncated_message()));
                }
            }
        }

        let histogram = match store.severity_counts(&assessment_id) {
            Ok(histogram) => histogram,
            Err(err) => {
                error!(assessment_id = %assessment_id, error = %err, "failed to reduce severity counts");
                let _ = store.update_assessment_status(
                    &assessment_id,
                    Status::Failed,
                    Some("INTERNAL_ERROR"),
                    Some(&err.truncated_message()),
                    Some(Utc::now()),
                );
                return;
            }
        };
        if let Err(err) = store.update_assessment_histogram(&assessment_id, &histogram) {
            error!(assessment_id = %assessment_id, error = %err, "failed to persist severity histogram");
        }

        if succeeded == 0 {
            let detail = failures
                .iter()
                .map(|(agent, message)| format!("{agent}: {message}"))
                .collect::<Vec<_>>()
                .join("; ");
            let message = if detail.is_empty() {
                "no requested agent ran".to_string()
            } else {
                detail
            };
            let _ = store.update_assessment_status(
                &assessment_id,
                Status::Failed,
                Some("AGENT_EXECUTION_FAILED"),
                Some(&message),
                Some(Utc::now()),
            );
            return;
        }

        let _ = store.update_assessment_status(
            &assessment_id,
            Status::Complete,
            None,
            None,
            Some(Utc::now()),
        );
        info!(assessment_id = %assessment_id, succeeded, failed = failures.len(), "robust assessment complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use secrecy::SecretString;
    use vibecheck_llm::ClientConfig;

    fn test_client(base_url: String) -> OpenAIClient {
        OpenAIClient::new(ClientConfig {
            base_url,
            api_key: SecretString::new("test".into()),
            default_model: "test-model".to_string(),
            headers: None,
            disable_system_proxy: true,
            timeout_seconds: 5,
            max_retries: 0,
            rate_limit_config: None,
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn unreachable_target_fails_before_spawning_agents() {
        let store = Store::open_in_memory().expect("open store");
        let assessment = sample_assessment("asm_1");
        store.insert_assessment(&assessment).expect("insert");

        let orchestrator = RobustOrchestrator::new(test_client("http://localhost:1".to_string()), Arc::new(TunnelManager::new()));
        orchestrator
            .run(
                store.clone(),
                "asm_1".to_string(),
                "http://127.0.0.1:1".to_string(),
                None,
                vec!["recon".to_string()],
                Depth::Quick,
            )
            .await;

        let updated = store.get_assessment("asm_1").expect("query").expect("found");
        assert_eq!(updated.status, Status::Failed);
        assert_eq!(updated.error_type.as_deref(), Some("TARGET_UNREACHABLE"));
    }

    #[tokio::test]
    async fn zero_recognized_agents_fails_with_agent_execution_failed() {
        let mut server = Server::new_async().await;
        let _health = server.mock("GET", "/").with_status(200).create_async().await;

        let store = Store::open_in_memory().expect("open store");
        let assessment = sample_assessment("asm_2");
        store.insert_assessment(&assessment).expect("insert");

        let orchestrator = RobustOrchestrator::new(test_client(server.url()), Arc::new(TunnelManager::new()));
        orchestrator
            .run(
                store.clone(),
                "asm_2".to_string(),
                server.url(),
                None,
                vec!["not-a-real-agent".to_string()],
                Depth::Quick,
            )
            .await;

        let updated = store.get_assessment("asm_2").expect("query").expect("found");
        assert_eq!(updated.status, Status::Failed);
        assert_eq!(updated.error_type.as_deref(), Some("AGENT_EXECUTION_FAILED"));
    }

    fn sample_assessment(id: &str) -> vibecheck_core::Assessment {
        let now = Utc::now();
        vibecheck_core::Assessment {
            id: id.to_string(),
            mode: vibecheck_core::Mode::Robust,
            status: Status::Queued,
            repo_url: None,
            target_url: Some("http://example.invalid".to_string()),
            tunnel_session_id: None,
            agents: Some(vec!["recon".to_string()]),
            depth: Depth::Quick,
            idempotency_key: None,
            finding_counts: vibecheck_core::SeverityHistogram::default(),
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
