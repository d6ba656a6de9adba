//! LLM-backed contextual analyzer.
//!
//! Ranks files by a fixed set of security-relevant keywords, concatenates as
//! many as fit in a fixed character budget, and asks the model for a single
//! JSON array of findings in one combined prompt. Any failure along the way
//! (HTTP error, malformed response, empty API key) degrades to an empty
//! result set rather than failing the assessment.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use vibecheck_core::lightweight::ContextualAnalyzer;
use vibecheck_core::{Location, ProjectInfo, RawFinding, ScannedFile, Severity};

use crate::{ChatRequest, Message, OpenAIClient, Role};

/// Files whose path hits one of these keywords are prioritized when the
/// file set exceeds the prompt budget.
const PRIORITY_KEYWORDS: &[&str] = &[
    "route",
    "api",
    "auth",
    "login",
    "middleware",
    "db",
    "database",
    "config",
    "server",
    "app",
];

/// Maximum combined character budget for concatenated file content. A file
/// that would overflow the remaining budget is skipped whole, never split.
const MAX_CONTENT_CHARS: usize = 50_000;

const ALLOWED_SEVERITIES: &[&str] = &["critical", "high", "medium", "low", "info"];

/// Contextual analyzer backed by an OpenAI-compatible chat model.
pub struct ContextualLlmAnalyzer {
    client: OpenAIClient,
}

impl ContextualLlmAnalyzer {
    /// Wrap an existing client.
    pub fn new(client: OpenAIClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContextualAnalyzer for ContextualLlmAnalyzer {
    async fn analyze(&self, files: &[ScannedFile], project_info: &ProjectInfo) -> Vec<RawFinding> {
        if files.is_empty() {
            return Vec::new();
        }

        let bundle = build_bundle(files);
        if bundle.is_empty() {
            return Vec::new();
        }

        let prompt = build_prompt(&bundle, project_info);

        let request = ChatRequest {
            model: self.client.default_model().to_string(),
            messages: vec![Message::text(Role::User, prompt)],
            temperature: Some(0.1),
            top_p: None,
            max_tokens: Some(4000),
            seed: None,
            response_format: None,
            tools: None,
        };

        let response = match self.client.chat(request).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "contextual analysis request failed, skipping");
                return Vec::new();
            }
        };

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content.and_then(|c| c.to_text_lossy()));

        match text {
            Some(text) => parse_findings(&text),
            None => Vec::new(),
        }
    }
}

/// Keyword-hit-count descending, stable, file-content concatenation capped
/// at [`MAX_CONTENT_CHARS`]. A file is included whole or not at all.
fn build_bundle(files: &[ScannedFile]) -> String {
    let mut ranked: Vec<&ScannedFile> = files.iter().collect();
    ranked.sort_by(|a, b| keyword_hits(b).cmp(&keyword_hits(a)));

    let mut bundle = String::new();
    let mut remaining = MAX_CONTENT_CHARS;

    for file in ranked {
        let entry = format!("### {}\n```\n{}\n```\n", file.path, file.content);
        if entry.len() > remaining {
            break;
        }
        remaining -= entry.len();
        bundle.push_str(&entry);
    }

    bundle
}

fn keyword_hits(file: &ScannedFile) -> usize {
    let path = file.path.to_ascii_lowercase();
    PRIORITY_KEYWORDS
        .iter()
        .map(|kw| path.matches(kw).count())
        .sum()
}

fn build_prompt(bundle: &str, project_info: &ProjectInfo) -> String {
    let language = project_info.language.as_deref().unwrap_or("unknown");
    let framework = project_info.framework.as_deref().unwrap_or("unknown");

    format!(
        "You are a senior application security reviewer. Analyze the following \
source files from a {language} project (framework: {framework}) for \
security issues that require understanding business logic or intent \
rather than pure pattern matching: broken access control, authorization \
bypasses, insecure business logic, unsafe trust boundaries, and logic \
flaws in authentication or session handling.\n\n\
Do NOT report: hardcoded secrets, dependency vulnerabilities, or \
generic insecure-function usage (eval, exec, raw SQL string building) \
- those are already covered by other tools. Focus only on issues that \
require contextual understanding of what the code is trying to do.\n\n\
Respond with a JSON array only, no prose, no markdown fences. Each \
element must have: severity (one of critical, high, medium, low, info), \
category, title, description, remediation, and an optional location \
string naming the file. If you find nothing, respond with an empty \
array: [].\n\n\
{bundle}"
    )
}

#[derive(Debug, Deserialize)]
struct RawLlmFinding {
    severity: String,
    category: String,
    title: String,
    description: String,
    remediation: String,
    location: Option<String>,
}

/// Parse the model's JSON-array response into findings, dropping anything
/// malformed or outside the allowed severity set. Never errors: any parse
/// failure yields an empty vector.
fn parse_findings(text: &str) -> Vec<RawFinding> {
    let trimmed = strip_code_fence(text.trim());

    let raw: Vec<RawLlmFinding> = match serde_json::from_str(trimmed) {
        Ok(items) => items,
        Err(err) => {
            warn!(error = %err, "contextual analyzer returned non-JSON response, skipping");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|item| {
            if !ALLOWED_SEVERITIES.contains(&item.severity.to_ascii_lowercase().as_str()) {
                warn!(severity = %item.severity, "contextual analyzer returned invalid severity, dropping finding");
                return None;
            }
            let severity = Severity::parse(&item.severity)?;
            Some(RawFinding {
                severity,
                category: item.category,
                title: item.title,
                description: item.description,
                location: item.location.map(|file| Location::File {
                    file,
                    line: 0,
                    snippet: String::new(),
                }),
                evidence: None,
                remediation: item.remediation,
            })
        })
        .collect()
}

/// Strip a leading/trailing ```json or ``` fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text)
        .trim_start();
    text.strip_suffix("```").unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_hits_prefers_auth_related_files() {
        let auth_file = ScannedFile {
            path: "auth/login.py".to_string(),
            content: "def login(password, token): pass".to_string(),
        };
        let plain_file = ScannedFile {
            path: "utils/strings.py".to_string(),
            content: "def reverse(s): return s[::-1]".to_string(),
        };
        assert!(keyword_hits(&auth_file) > keyword_hits(&plain_file));
    }

    #[test]
    fn build_bundle_skips_files_that_overflow_budget() {
        let big = ScannedFile {
            path: "big.txt".to_string(),
            content: "x".repeat(MAX_CONTENT_CHARS + 1),
        };
        let bundle = build_bundle(&[big]);
        assert!(bundle.is_empty());
    }

    #[test]
    fn build_bundle_stops_at_first_overflow_instead_of_packing_later_files() {
        let first = ScannedFile {
            path: "auth/big.py".to_string(),
            content: "x".repeat(MAX_CONTENT_CHARS + 1),
        };
        let second = ScannedFile {
            path: "utils/tiny.py".to_string(),
            content: "y".to_string(),
        };
        let bundle = build_bundle(&[first, second]);
        assert!(bundle.is_empty());
    }

    #[test]
    fn parse_findings_drops_invalid_severity() {
        let text = r#"[{"severity":"critical","category":"authz","title":"t","description":"d","remediation":"r"},
                        {"severity":"bogus","category":"authz","title":"t2","description":"d","remediation":"r"}]"#;
        let findings = parse_findings(text);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn parse_findings_strips_code_fence() {
        let text = "```json\n[]\n```";
        let findings = parse_findings(text);
        assert!(findings.is_empty());
    }

    #[test]
    fn parse_findings_returns_empty_on_malformed_json() {
        let findings = parse_findings("not json at all");
        assert!(findings.is_empty());
    }
}
