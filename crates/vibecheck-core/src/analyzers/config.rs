//! Configuration and deployment-artifact analyzer: .gitignore hygiene,
//! Dockerfile hardening, Next.js config, package.json lifecycle scripts,
//! and docker-compose network exposure.

use crate::models::{Location, ProjectInfo, RawFinding, ScannedFile, Severity};
use regex::Regex;
use std::sync::OnceLock;

fn docker_user_root() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| Regex::new(r"USER\s+root").expect("static regex is valid"))
}

fn docker_user_any() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| Regex::new(r"USER\s+\w+").expect("static regex is valid"))
}

fn docker_copy_env() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| Regex::new(r"COPY\s+\.env").expect("static regex is valid"))
}

fn next_strict_mode_false() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| Regex::new(r"reactStrictMode\s*:\s*false").expect("static regex is valid"))
}

fn next_wildcard_images() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| {
        Regex::new(r"(?s)(?:images|remotePatterns).*\*").expect("static regex is valid")
    })
}

fn compose_bound_all_interfaces() -> &'static Regex {
    static CACHE: OnceLock<Regex> = OnceLock::new();
    CACHE.get_or_init(|| {
        Regex::new(r#"ports:\s*\n\s*-\s*["']?0\.0\.0\.0:"#).expect("static regex is valid")
    })
}

fn finding(
    severity: Severity,
    category: &str,
    title: impl Into<String>,
    description: impl Into<String>,
    file: impl Into<String>,
    remediation: impl Into<String>,
) -> RawFinding {
    RawFinding {
        severity,
        category: category.to_string(),
        title: title.into(),
        description: description.into(),
        location: Some(Location::File {
            file: file.into(),
            line: 1,
            snippet: String::new(),
        }),
        evidence: None,
        remediation: remediation.into(),
    }
}

/// Analyze configuration and deployment files for security misconfigurations.
pub fn scan(files: &[ScannedFile], project_info: &ProjectInfo) -> Vec<RawFinding> {
    let mut findings = Vec::new();

    let has_env_file = files
        .iter()
        .any(|f| f.path == ".env" || f.path.ends_with("/.env"));
    let env_in_gitignore = project_info
        .gitignore_entries
        .iter()
        .any(|e| matches!(e.as_str(), ".env" | ".env*" | ".env.*" | "*.env"));

    if has_env_file && !env_in_gitignore {
        findings.push(finding(
            Severity::Critical,
            "exposed_secrets",
            ".env file not in .gitignore",
            "An .env file exists but is not listed in .gitignore. If committed, environment \
             variables (database URLs, API keys, secrets) will be exposed in version control \
             history.",
            ".gitignore",
            "Add '.env' to .gitignore immediately. If already committed, rotate all secrets in \
             the .env file and use 'git filter-branch' or BFG to remove it from history.",
        ));
    }

    if !project_info.has_gitignore {
        findings.push(finding(
            Severity::High,
            "missing_gitignore",
            "No .gitignore file found",
            "No .gitignore file was detected. This risks committing sensitive files, build \
             artifacts, and dependencies to version control.",
            ".gitignore",
            "Create a .gitignore file. Use gitignore.io to generate one for your \
             language/framework.",
        ));
    }

    for f in files {
        if !f.path.contains("Dockerfile") {
            continue;
        }

        if docker_user_root().is_match(&f.content) || !docker_user_any().is_match(&f.content) {
            findings.push(finding(
                Severity::Medium,
                "container_security",
                format!("Container runs as root in {}", f.path),
                "Dockerfile does not specify a non-root USER. Container processes running as \
                 root can escalate to host-level access if the container is compromised.",
                f.path.clone(),
                "Add 'RUN adduser --disabled-password appuser' and 'USER appuser' to your \
                 Dockerfile.",
            ));
        }

        if docker_copy_env().is_match(&f.content) {
            findings.push(finding(
                Severity::Critical,
                "exposed_secrets",
                format!(".env file copied into Docker image in {}", f.path),
                "The .env file is being COPY'd into the Docker image. Anyone with access to the \
                 image can extract all secrets.",
                f.path.clone(),
                "Use Docker secrets or pass environment variables at runtime with 'docker run \
                 -e' or '--env-file'. Add .env to .dockerignore.",
            ));
        }
    }

    for f in files {
        if !f.path.contains("next.config") {
            continue;
        }

        if next_strict_mode_false().is_match(&f.content) {
            findings.push(finding(
                Severity::Low,
                "framework_config",
                "React Strict Mode disabled in Next.js",
                "React Strict Mode is disabled. It helps identify unsafe lifecycles and \
                 deprecated patterns.",
                f.path.clone(),
                "Set reactStrictMode: true in next.config.js.",
            ));
        }

        if next_wildcard_images().is_match(&f.content) {
            findings.push(finding(
                Severity::Medium,
                "framework_config",
                "Wildcard image domains in Next.js",
                "Next.js image optimization is configured with wildcard domains. This allows \
                 loading images from any external source.",
                f.path.clone(),
                "Restrict image domains to specific trusted sources.",
            ));
        }
    }

    for f in files {
        if f.path != "package.json" && !f.path.ends_with("/package.json") {
            continue;
        }

        if f.content.contains("\"postinstall\"") || f.content.contains("\"preinstall\"") {
            findings.push(finding(
                Severity::Info,
                "supply_chain",
                "Install lifecycle scripts detected",
                "package.json contains pre/post install scripts. These run automatically on \
                 'npm install' and could execute malicious code if a dependency is compromised.",
                f.path.clone(),
                "Audit install scripts. Consider using --ignore-scripts flag or npm's \
                 'allow-scripts' feature.",
            ));
        }
    }

    for f in files {
        if !f.path.contains("docker-compose") {
            continue;
        }

        if compose_bound_all_interfaces().is_match(&f.content) {
            findings.push(finding(
                Severity::Medium,
                "network_exposure",
                format!("Service bound to all interfaces in {}", f.path),
                "A service is bound to 0.0.0.0, making it accessible from any network interface, \
                 not just localhost.",
                f.path.clone(),
                "Bind to 127.0.0.1 for services that should only be accessed locally.",
            ));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> ScannedFile {
        ScannedFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn flags_env_file_not_gitignored() {
        let files = vec![file(".env", "SECRET=1")];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(findings
            .iter()
            .any(|f| f.title == ".env file not in .gitignore"));
    }

    #[test]
    fn env_in_gitignore_suppresses_finding() {
        let files = vec![file(".env", "SECRET=1")];
        let info = ProjectInfo {
            has_gitignore: true,
            gitignore_entries: vec![".env".to_string()],
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(!findings
            .iter()
            .any(|f| f.title == ".env file not in .gitignore"));
    }

    #[test]
    fn missing_gitignore_flagged() {
        let info = ProjectInfo::default();
        let findings = scan(&[], &info);
        assert!(findings.iter().any(|f| f.category == "missing_gitignore"));
    }

    #[test]
    fn dockerfile_without_user_flagged_as_root() {
        let files = vec![file("Dockerfile", "FROM node:20\nCMD [\"node\", \"index.js\"]")];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(findings.iter().any(|f| f.category == "container_security"));
    }

    #[test]
    fn dockerfile_with_nonroot_user_not_flagged() {
        let files = vec![file(
            "Dockerfile",
            "FROM node:20\nUSER appuser\nCMD [\"node\", \"index.js\"]",
        )];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(!findings.iter().any(|f| f.category == "container_security"));
    }

    #[test]
    fn wildcard_next_image_domains_flagged() {
        let files = vec![file(
            "next.config.js",
            "module.exports = {\n  images: {\n    remotePatterns: [{ hostname: '*' }]\n  }\n}",
        )];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(findings
            .iter()
            .any(|f| f.title == "Wildcard image domains in Next.js"));
    }

    #[test]
    fn compose_bound_to_all_interfaces_flagged() {
        let files = vec![file(
            "docker-compose.yml",
            "services:\n  web:\n    ports:\n      - \"0.0.0.0:8080:8080\"",
        )];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(findings.iter().any(|f| f.category == "network_exposure"));
    }

    #[test]
    fn package_json_lifecycle_script_flagged() {
        let files = vec![file(
            "package.json",
            "{\"scripts\": {\"postinstall\": \"node setup.js\"}}",
        )];
        let info = ProjectInfo {
            has_gitignore: true,
            ..Default::default()
        };
        let findings = scan(&files, &info);
        assert!(findings.iter().any(|f| f.category == "supply_chain"));
    }
}
