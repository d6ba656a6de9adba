//! The per-agent LLM tool-use loop: advertise `http_request`/`check_headers`/
//! `report_finding` to the model, dispatch whatever it calls, and keep going
//! until it stops calling tools or the step budget is exhausted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use vibecheck_core::{generate_id, AgentLog, Depth, Finding, Location, Result, Severity, Store};
use vibecheck_llm::{ChatRequest, Message, OpenAIClient, Role, ToolSpec};

use crate::coverage::CoverageContext;
use crate::http_probe::Prober;
use crate::prompts::system_prompt_for;
use crate::registry::{ToolDefinition, ToolRegistry};

struct Budgets {
    max_steps: u32,
    max_http_requests: u32,
    per_path_cap: u32,
}

fn budgets_for(depth: Depth) -> Budgets {
    match depth {
        Depth::Quick => Budgets { max_steps: 10, max_http_requests: 30, per_path_cap: 2 },
        Depth::Standard => Budgets { max_steps: 28, max_http_requests: 85, per_path_cap: 3 },
        Depth::Deep => Budgets { max_steps: 55, max_http_requests: 170, per_path_cap: 4 },
    }
}

/// Shared, interior-mutable counters the tool handlers enforce budgets against.
struct LoopState {
    step_count: AtomicU32,
    http_request_count: AtomicU32,
    per_path_attempts: Mutex<HashMap<String, u32>>,
}

/// Run one agent's tool-use loop to completion. Returns the number of
/// findings it reported. Propagates only persistence errors; vendor/network
/// failures are absorbed by terminating the loop early (mirrors the
/// teacher's "one bad LLM call ends this agent's turn, not the assessment").
#[instrument(skip(client, store, coverage, prober))]
pub async fn run_agent(
    agent_name: &str,
    client: &OpenAIClient,
    store: &Store,
    assessment_id: &str,
    target_url: &str,
    depth: Depth,
    coverage: &CoverageContext,
    prober: &Prober,
) -> Result<usize> {
    let system_prompt = system_prompt_for(agent_name).unwrap_or(
        "You are a security assessment agent. Probe the target application and report any \
         vulnerabilities you can confirm with evidence.",
    );
    let budgets = budgets_for(depth);

    let state = Arc::new(LoopState {
        step_count: AtomicU32::new(0),
        http_request_count: AtomicU32::new(0),
        per_path_attempts: Mutex::new(HashMap::new()),
    });

    let registry = build_tool_registry(
        state.clone(),
        store.clone(),
        assessment_id.to_string(),
        agent_name.to_string(),
        target_url.to_string(),
        prober.clone(),
        budgets.max_http_requests,
        budgets.per_path_cap,
    )
    .await;

    let tool_specs: Vec<ToolSpec> = registry
        .list_tools()
        .await
        .into_iter()
        .map(to_tool_spec)
        .collect();

    let initial_turn = build_initial_turn(target_url, depth, &budgets, coverage);
    let mut conversation = vec![
        Message::text(Role::System, system_prompt),
        Message::text(Role::User, initial_turn),
    ];

    let mut findings_reported = 0usize;

    while state.step_count.load(Ordering::SeqCst) < budgets.max_steps {
        let request = ChatRequest {
            model: client.default_model().to_string(),
            messages: conversation.clone(),
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(2000),
            seed: None,
            response_format: None,
            tools: Some(tool_specs.clone()),
        };

        let response = match client.chat(request).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(agent = agent_name, error = %err, "agent loop LLM call failed, ending turn");
                break;
            }
        };

        let Some(choice) = response.choices.into_iter().next() else {
            break;
        };
        let assistant_message = choice.message;

        let tool_calls = assistant_message.tool_calls.clone().unwrap_or_default();
        if tool_calls.is_empty() {
            break;
        }

        conversation.push(assistant_message);

        for call in &tool_calls {
            if state.step_count.load(Ordering::SeqCst) >= budgets.max_steps {
                break;
            }

            let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(json!({}));
            let result = registry
                .call_tool(&call.function.name, args)
                .await
                .unwrap_or_else(|err| json!({ "error": err.to_string() }));

            if call.function.name == "report_finding" && result.get("finding_id").is_some() {
                findings_reported += 1;
            }

            let content = serde_json::to_string(&result).unwrap_or_default();
            conversation.push(Message::tool_response(call.id.clone(), content));
        }
    }

    debug!(
        agent = agent_name,
        steps = state.step_count.load(Ordering::SeqCst),
        findings_reported,
        "agent loop finished"
    );

    Ok(findings_reported)
}

fn build_initial_turn(target_url: &str, depth: Depth, budgets: &Budgets, coverage: &CoverageContext) -> String {
    let seed_paths: Vec<&String> = coverage.seed_paths.iter().take(60).collect();
    let reachable: Vec<String> = coverage
        .reachable_paths
        .iter()
        .take(60)
        .map(|r| format!("{} ({})", r.path, r.status))
        .collect();
    let samples: Vec<&String> = coverage.request_samples.iter().take(20).collect();

    format!(
        "Target URL: {target_url}\n\
         Depth: {depth}\n\
         Max steps: {max_steps}\n\
         Max HTTP requests: {max_http}\n\
         Per-path attempt cap: {per_path}\n\n\
         Coverage context from an initial crawl:\n\
         Seed paths: {seed_paths:?}\n\
         Reachable paths (path, status): {reachable:?}\n\
         Request samples (paths with query strings): {samples:?}\n\n\
         Begin your security assessment. Use your tools to probe the target. Prioritize \
         breadth before depth — cover the attack surface before digging deep on any one path. \
         Call report_finding for each confirmed vulnerability with evidence.",
        max_steps = budgets.max_steps,
        max_http = budgets.max_http_requests,
        per_path = budgets.per_path_cap,
    )
}

fn to_tool_spec(def: ToolDefinition) -> ToolSpec {
    ToolSpec::function(def.name, def.description, def.input_schema)
}

#[allow(clippy::too_many_arguments)]
async fn build_tool_registry(
    state: Arc<LoopState>,
    store: Store,
    assessment_id: String,
    agent_name: String,
    target_url: String,
    prober: Prober,
    max_http_requests: u32,
    per_path_cap: u32,
) -> ToolRegistry {
    let registry = ToolRegistry::new();

    {
        let state = state.clone();
        let store = store.clone();
        let assessment_id = assessment_id.clone();
        let agent_name = agent_name.clone();
        let target_url = target_url.clone();
        let prober = prober.clone();

        registry
            .register_tool(
                ToolDefinition {
                    name: "http_request".to_string(),
                    description: "Make an HTTP request to the target application. Use this to \
                        probe endpoints, submit forms, test payloads, and observe responses."
                        .to_string(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "method": {
                                "type": "string",
                                "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"]
                            },
                            "path": {
                                "type": "string",
                                "description": "Path relative to target, e.g. /api/users or /admin"
                            },
                            "headers": {
                                "type": "object",
                                "description": "Optional request headers as key-value pairs"
                            },
                            "body": {
                                "type": "string",
                                "description": "Optional request body (for POST/PUT/PATCH)"
                            }
                        },
                        "required": ["method", "path"]
                    }),
                },
                Box::new(move |args: Value| {
                    let state = state.clone();
                    let store = store.clone();
                    let assessment_id = assessment_id.clone();
                    let agent_name = agent_name.clone();
                    let target_url = target_url.clone();
                    let prober = prober.clone();
                    Box::pin(async move {
                        let method = args.get("method").and_then(|v| v.as_str()).unwrap_or("GET").to_string();
                        let mut path = args.get("path").and_then(|v| v.as_str()).unwrap_or("/").to_string();
                        if !path.starts_with('/') {
                            path = format!("/{path}");
                        }
                        let headers: Option<HashMap<String, String>> = args
                            .get("headers")
                            .and_then(|v| v.as_object())
                            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect());
                        let body = args.get("body").and_then(|v| v.as_str()).map(|s| s.to_string());

                        if state.http_request_count.load(Ordering::SeqCst) >= max_http_requests {
                            log_step(
                                &store,
                                &assessment_id,
                                &agent_name,
                                &state,
                                format!("{method} {path}"),
                                path.clone(),
                                body,
                                None,
                                None,
                                format!("Request budget exhausted before probing {path} with {method}"),
                                None,
                            )?;
                            return Ok(json!({"error": "request_budget_exceeded"}));
                        }
                        let path_key = format!("{method} {path}");
                        let path_limit_reached = {
                            let mut attempts = state.per_path_attempts.lock().unwrap();
                            let count = attempts.entry(path_key.clone()).or_insert(0);
                            if *count >= per_path_cap {
                                true
                            } else {
                                *count += 1;
                                false
                            }
                        };
                        if path_limit_reached {
                            log_step(
                                &store,
                                &assessment_id,
                                &agent_name,
                                &state,
                                format!("{method} {path}"),
                                path.clone(),
                                body,
                                None,
                                None,
                                format!("Per-path attempt limit reached for {method} {path}"),
                                None,
                            )?;
                            return Ok(json!({"error": "path_attempt_limit_reached"}));
                        }
                        state.http_request_count.fetch_add(1, Ordering::SeqCst);

                        let result = prober.request(&target_url, &method, &path, headers.as_ref(), body.as_deref()).await;

                        let response_preview = result
                            .get("body_preview")
                            .and_then(|v| v.as_str())
                            .or_else(|| result.get("message").and_then(|v| v.as_str()))
                            .map(|s| s.chars().take(500).collect::<String>());
                        log_step(
                            &store,
                            &assessment_id,
                            &agent_name,
                            &state,
                            format!("{method} {path}"),
                            path.clone(),
                            body,
                            result.get("status_code").and_then(|v| v.as_u64()).map(|n| n as u16),
                            response_preview,
                            format!("Probing {path} with {method}"),
                            None,
                        )?;

                        Ok(result)
                    })
                }),
            )
            .await
            .expect("http_request schema is valid");
    }

    {
        let state = state.clone();
        let store = store.clone();
        let assessment_id = assessment_id.clone();
        let agent_name = agent_name.clone();
        let target_url = target_url.clone();
        let prober = prober.clone();

        registry
            .register_tool(
                ToolDefinition {
                    name: "check_headers".to_string(),
                    description: "Check security headers on a specific path. Returns which \
                        security headers are present, missing, and any issues (CORS, server \
                        disclosure, etc.)."
                        .to_string(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string", "description": "Path to check, defaults to /" }
                        }
                    }),
                },
                Box::new(move |args: Value| {
                    let state = state.clone();
                    let store = store.clone();
                    let assessment_id = assessment_id.clone();
                    let agent_name = agent_name.clone();
                    let target_url = target_url.clone();
                    let prober = prober.clone();
                    Box::pin(async move {
                        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("/").to_string();
                        let result = prober.check_headers(&target_url, &path).await;

                        let issues_preview = result
                            .get("issues")
                            .map(|v| serde_json::to_string(v).unwrap_or_default())
                            .map(|s| s.chars().take(500).collect::<String>());
                        log_step(
                            &store,
                            &assessment_id,
                            &agent_name,
                            &state,
                            format!("Check security headers on {path}"),
                            path.clone(),
                            None,
                            None,
                            issues_preview,
                            "Analyzing security headers".to_string(),
                            None,
                        )?;

                        Ok(result)
                    })
                }),
            )
            .await
            .expect("check_headers schema is valid");
    }

    {
        let state = state.clone();
        let store = store.clone();
        let assessment_id = assessment_id.clone();
        let agent_name = agent_name.clone();

        registry
            .register_tool(
                ToolDefinition {
                    name: "report_finding".to_string(),
                    description: "Report a confirmed or highly likely security vulnerability. \
                        Only call this when you have evidence from probing, not for theoretical \
                        issues."
                        .to_string(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "severity": { "type": "string", "enum": ["critical", "high", "medium", "low", "info"] },
                            "category": { "type": "string" },
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "evidence": { "type": "object" },
                            "remediation": { "type": "string" }
                        },
                        "required": ["severity", "category", "title", "description", "remediation"]
                    }),
                },
                Box::new(move |args: Value| {
                    let state = state.clone();
                    let store = store.clone();
                    let assessment_id = assessment_id.clone();
                    let agent_name = agent_name.clone();
                    Box::pin(async move { report_finding(&store, &assessment_id, &agent_name, &state, args) })
                }),
            )
            .await
            .expect("report_finding schema is valid");
    }

    registry
}

#[allow(clippy::too_many_arguments)]
fn log_step(
    store: &Store,
    assessment_id: &str,
    agent_name: &str,
    state: &LoopState,
    action: String,
    target: String,
    payload: Option<String>,
    response_code: Option<u16>,
    response_preview: Option<String>,
    reasoning: String,
    finding_id: Option<String>,
) -> Result<()> {
    let step = state.step_count.fetch_add(1, Ordering::SeqCst) + 1;
    store.insert_agent_log(&AgentLog {
        id: generate_id("log"),
        assessment_id: assessment_id.to_string(),
        agent: agent_name.to_string(),
        step,
        action,
        target,
        payload,
        response_code,
        response_preview,
        reasoning,
        finding_id,
        timestamp: Utc::now(),
    })
}

fn report_finding(
    store: &Store,
    assessment_id: &str,
    agent_name: &str,
    state: &LoopState,
    args: Value,
) -> anyhow::Result<Value> {
    let severity_str = args.get("severity").and_then(|v| v.as_str()).unwrap_or("info");
    let severity = Severity::parse(severity_str).unwrap_or(Severity::Info);
    let category = args.get("category").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    let title = args.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled finding").to_string();
    let description = args.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let remediation = args.get("remediation").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let evidence = args.get("evidence").cloned();

    let location = evidence
        .as_ref()
        .and_then(|e| e.get("url"))
        .and_then(|u| u.as_str())
        .map(|url| Location::Endpoint { url: url.to_string() });

    let finding = Finding {
        id: generate_id("fnd"),
        assessment_id: assessment_id.to_string(),
        severity,
        category: category.clone(),
        title: title.clone(),
        description: description.clone(),
        location,
        evidence: evidence.clone(),
        remediation,
        agent: agent_name.to_string(),
        created_at: Utc::now(),
    };
    store.insert_finding(&finding)?;

    let target = evidence
        .as_ref()
        .and_then(|e| e.get("url"))
        .and_then(|u| u.as_str())
        .unwrap_or("")
        .to_string();

    log_step(
        store,
        assessment_id,
        agent_name,
        state,
        format!("Reported {severity_str} finding: {title}"),
        target,
        None,
        None,
        Some(description.chars().take(500).collect()),
        format!("Confirmed vulnerability: {category}"),
        Some(finding.id.clone()),
    )?;

    Ok(json!({"status": "finding_reported", "finding_id": finding.id}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageContext;

    #[tokio::test]
    async fn report_finding_tool_persists_and_logs() {
        let store = Store::open_in_memory().expect("open store");
        let state = LoopState {
            step_count: AtomicU32::new(0),
            http_request_count: AtomicU32::new(0),
            per_path_attempts: Mutex::new(HashMap::new()),
        };

        let args = json!({
            "severity": "high",
            "category": "missing_auth",
            "title": "Admin panel exposed",
            "description": "The /admin panel is reachable without authentication.",
            "evidence": {"url": "http://target/admin"},
            "remediation": "Require authentication on /admin."
        });

        let result = report_finding(&store, "asm_1", "recon", &state, args).expect("report");
        assert_eq!(result["status"], "finding_reported");
        assert_eq!(state.step_count.load(Ordering::SeqCst), 1);

        let logs = store.list_agent_logs("asm_1").expect("logs");
        assert_eq!(logs.len(), 1);
        assert!(logs[0].finding_id.is_some());
    }

    #[test]
    fn budgets_scale_with_depth() {
        assert!(budgets_for(Depth::Quick).max_steps < budgets_for(Depth::Standard).max_steps);
        assert!(budgets_for(Depth::Standard).max_steps < budgets_for(Depth::Deep).max_steps);
    }

    #[test]
    fn initial_turn_caps_coverage_excerpts() {
        let mut coverage = CoverageContext::default();
        for i in 0..100 {
            coverage.seed_paths.push(format!("/seed{i}"));
        }
        let turn = build_initial_turn("http://target", Depth::Standard, &budgets_for(Depth::Standard), &coverage);
        assert!(turn.contains("Target URL: http://target"));
    }

    #[tokio::test]
    async fn request_budget_exceeded_still_logs_a_step() {
        let store = Store::open_in_memory().expect("open store");
        let state = Arc::new(LoopState {
            step_count: AtomicU32::new(0),
            http_request_count: AtomicU32::new(0),
            per_path_attempts: Mutex::new(HashMap::new()),
        });

        let registry = build_tool_registry(
            state.clone(),
            store.clone(),
            "asm_1".to_string(),
            "recon".to_string(),
            "http://target".to_string(),
            Prober::Direct,
            0,
            3,
        )
        .await;

        let result = registry
            .call_tool("http_request", json!({"method": "GET", "path": "/admin"}))
            .await
            .expect("tool call");
        assert_eq!(result["error"], "request_budget_exceeded");
        assert_eq!(state.step_count.load(Ordering::SeqCst), 1);

        let logs = store.list_agent_logs("asm_1").expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].step, 1);
        assert!(logs[0].finding_id.is_none());
    }

    #[tokio::test]
    async fn path_attempt_limit_still_logs_a_step() {
        let store = Store::open_in_memory().expect("open store");
        let state = Arc::new(LoopState {
            step_count: AtomicU32::new(0),
            http_request_count: AtomicU32::new(0),
            per_path_attempts: Mutex::new(HashMap::new()),
        });

        let registry = build_tool_registry(
            state.clone(),
            store.clone(),
            "asm_2".to_string(),
            "recon".to_string(),
            "http://target".to_string(),
            Prober::Direct,
            30,
            0,
        )
        .await;

        let result = registry
            .call_tool("http_request", json!({"method": "GET", "path": "/admin"}))
            .await
            .expect("tool call");
        assert_eq!(result["error"], "path_attempt_limit_reached");
        assert_eq!(state.step_count.load(Ordering::SeqCst), 1);

        let logs = store.list_agent_logs("asm_2").expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].step, 1);
    }
}
