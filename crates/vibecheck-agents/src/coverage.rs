//! Coverage builder: a cheap breadth-first crawl that gives each agent a
//! starting map of the target's attack surface before its tool-use loop
//! begins.

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vibecheck_core::Depth;

use crate::http_probe::Prober;

/// A path the crawl reached successfully, with its observed status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachablePath {
    /// Path probed.
    pub path: String,
    /// HTTP status observed.
    pub status: u16,
}

/// Result of the coverage crawl, handed to every agent as initial context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageContext {
    /// Total probes issued during the crawl.
    pub probed_count: u32,
    /// The seed paths the crawl started from, sorted.
    pub seed_paths: Vec<String>,
    /// Paths that returned a non-error, non-404 response (capped at 80).
    pub reachable_paths: Vec<ReachablePath>,
    /// Up to 10 discovered paths containing a `?`, for payload inspiration.
    pub request_samples: Vec<String>,
}

struct Budgets {
    seed_paths: usize,
    max_requests: u32,
    max_discovered: usize,
}

fn budgets_for(depth: Depth) -> Budgets {
    match depth {
        Depth::Quick => Budgets { seed_paths: 15, max_requests: 12, max_discovered: 25 },
        Depth::Standard => Budgets { seed_paths: 35, max_requests: 24, max_discovered: 55 },
        Depth::Deep => Budgets { seed_paths: 60, max_requests: 40, max_discovered: 90 },
    }
}

const COMMON_PATHS: &[&str] = &[
    "/",
    "/api",
    "/api/v1",
    "/api/v2",
    "/admin",
    "/login",
    "/register",
    "/dashboard",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/swagger",
    "/swagger.json",
    "/graphql",
    "/graphiql",
    "/metrics",
    "/health",
    "/status",
    "/debug",
    "/config",
    "/.well-known/security.txt",
    "/robots.txt",
    "/sitemap.xml",
    "/humans.txt",
    "/security.txt",
    "/.env",
    "/.git",
    "/.git/config",
    "/.git/HEAD",
    "/config.json",
    "/config.yaml",
    "/.aws/credentials",
    "/wp-config.php",
    "/database.yml",
    "/wp-admin",
    "/administrator",
    "/phpmyadmin",
    "/adminer",
];

const STATIC_ASSET_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".woff", ".woff2", ".ttf", ".eot",
    ".map",
];

/// Run the coverage crawl against `target_url` at the given `depth`, using
/// `prober` for every probe so a tunneled target is crawled the same way a
/// directly reachable one is.
pub async fn build_coverage(prober: &Prober, target_url: &str, depth: Depth) -> CoverageContext {
    let budgets = budgets_for(depth);
    let seed_paths: Vec<String> = COMMON_PATHS
        .iter()
        .take(budgets.seed_paths)
        .map(|p| p.to_string())
        .collect();

    let quoted_path_re = Regex::new(r#"['"`](/[^\s'"`]{1,240})['"`]"#).expect("valid regex");
    let js_call_re =
        Regex::new(r#"(?:fetch|axios\.(?:get|post|put|patch|delete))\(\s*['"`]([^'"`]+)['"`]"#)
            .expect("valid regex");

    let mut seen: HashSet<String> = seed_paths.iter().cloned().collect();
    let mut queue: VecDeque<String> = seed_paths.iter().cloned().collect();
    let mut reachable: Vec<ReachablePath> = Vec::new();
    let mut request_samples: Vec<String> = Vec::new();
    let mut probed_count: u32 = 0;

    while let Some(path) = queue.pop_front() {
        if probed_count >= budgets.max_requests {
            break;
        }

        let result = prober.request(target_url, "GET", &path, None, None).await;
        probed_count += 1;

        if result.get("error").is_some() {
            continue;
        }
        let status = result.get("status_code").and_then(|s| s.as_u64()).unwrap_or(0) as u16;
        if status == 404 {
            continue;
        }

        if reachable.len() < 80 {
            reachable.push(ReachablePath { path: path.clone(), status });
        }

        let body = result.get("body_preview").and_then(|b| b.as_str()).unwrap_or_default();
        let mut discovered: Vec<String> = Vec::new();
        for caps in quoted_path_re.captures_iter(body) {
            discovered.push(caps[1].to_string());
        }
        for caps in js_call_re.captures_iter(body) {
            discovered.push(caps[1].to_string());
        }

        for raw in discovered {
            let normalized = normalize_path(&raw);
            if is_static_asset(&normalized) {
                continue;
            }
            if normalized.contains('?') && request_samples.len() < 10 {
                request_samples.push(normalized.clone());
            }
            if seen.len() >= budgets.max_discovered {
                continue;
            }
            if seen.insert(normalized.clone()) {
                queue.push_back(normalized);
            }
        }
    }

    debug!(probed_count, reachable = reachable.len(), "coverage crawl complete");

    let mut sorted_seeds = seed_paths;
    sorted_seeds.sort();

    CoverageContext {
        probed_count,
        seed_paths: sorted_seeds,
        reachable_paths: reachable,
        request_samples,
    }
}

/// Strip scheme/host, preserve the query string, drop a trailing `/` except
/// for the root path.
fn normalize_path(raw: &str) -> String {
    let without_host = if let Some(idx) = raw.find("://") {
        raw[idx + 3..].splitn(2, '/').nth(1).map(|rest| format!("/{rest}")).unwrap_or_default()
    } else {
        raw.to_string()
    };

    if without_host.len() > 1 && without_host.ends_with('/') {
        without_host.trim_end_matches('/').to_string()
    } else {
        without_host
    }
}

fn is_static_asset(path: &str) -> bool {
    let path_without_query = path.split('?').next().unwrap_or(path);
    STATIC_ASSET_SUFFIXES
        .iter()
        .any(|suffix| path_without_query.to_ascii_lowercase().ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_strips_scheme_and_host() {
        assert_eq!(normalize_path("https://example.com/api/users"), "/api/users");
    }

    #[test]
    fn normalize_path_drops_trailing_slash_except_root() {
        assert_eq!(normalize_path("/api/users/"), "/api/users");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn is_static_asset_matches_known_suffixes() {
        assert!(is_static_asset("/assets/logo.png"));
        assert!(is_static_asset("/fonts/app.woff2?v=2"));
        assert!(!is_static_asset("/api/users"));
    }

    #[tokio::test]
    async fn build_coverage_respects_quick_request_budget() {
        let context = build_coverage(&Prober::Direct, "http://127.0.0.1:1", Depth::Quick).await;
        assert!(context.probed_count <= 12);
        assert_eq!(context.seed_paths.len(), 15);
    }
}
