//! Known-vulnerable dependency version analyzer.

use crate::models::{Location, ProjectInfo, RawFinding, Severity};
use serde_json::json;

/// One `(operator, vulnerable-below version, severity, cve id, description)` entry.
type VulnEntry = (&'static str, &'static str, &'static str, &'static str, &'static str);

/// Known-vulnerable version ranges, keyed by lowercase package name.
pub const VULN_DB: &[(&str, &[VulnEntry])] = &[
    (
        "express",
        &[("<", "4.19.2", "high", "CVE-2024-29041", "Open redirect vulnerability in express")],
    ),
    (
        "jsonwebtoken",
        &[(
            "<",
            "9.0.0",
            "critical",
            "CVE-2022-23529",
            "JWT verification bypass allows arbitrary code execution",
        )],
    ),
    (
        "lodash",
        &[("<", "4.17.21", "critical", "CVE-2021-23337", "Prototype pollution via zipObjectDeep")],
    ),
    (
        "axios",
        &[("<", "1.6.0", "high", "CVE-2023-45857", "SSRF via server-side request forgery")],
    ),
    (
        "node-fetch",
        &[(
            "<",
            "2.6.7",
            "high",
            "CVE-2022-0235",
            "Exposure of sensitive information to unauthorized actor",
        )],
    ),
    ("minimist", &[("<", "1.2.6", "critical", "CVE-2021-44906", "Prototype pollution")]),
    (
        "qs",
        &[("<", "6.10.3", "high", "CVE-2022-24999", "Prototype pollution via __proto__ parameter")],
    ),
    (
        "tar",
        &[("<", "6.1.9", "high", "CVE-2021-37712", "Arbitrary file creation/overwrite via symlink")],
    ),
    (
        "glob-parent",
        &[("<", "5.1.2", "high", "CVE-2020-28469", "Regular expression denial of service")],
    ),
    (
        "next",
        &[("<", "14.1.1", "high", "CVE-2024-34351", "Server-side request forgery in Server Actions")],
    ),
    (
        "sequelize",
        &[("<", "6.33.0", "high", "CVE-2023-22578", "SQL injection via replacements")],
    ),
    (
        "mysql2",
        &[(
            "<",
            "3.6.0",
            "critical",
            "CVE-2024-21511",
            "Remote code execution via prototype poisoning",
        )],
    ),
    ("helmet", &[("<", "7.0.0", "medium", "N/A", "Outdated security headers configuration")]),
    ("cors", &[("<", "2.8.5", "medium", "N/A", "CORS misconfiguration possible in older versions")]),
    ("passport", &[("<", "0.6.0", "high", "CVE-2022-25896", "Session fixation attack")]),
    (
        "flask",
        &[(
            "<",
            "2.3.2",
            "high",
            "CVE-2023-30861",
            "Session cookie set without Secure flag on non-HTTPS",
        )],
    ),
    (
        "django",
        &[("<", "4.2.4", "high", "CVE-2023-36053", "Potential ReDoS in EmailValidator/URLValidator")],
    ),
    (
        "pyyaml",
        &[("<", "6.0", "critical", "CVE-2020-14343", "Arbitrary code execution via yaml.load")],
    ),
    (
        "requests",
        &[("<", "2.31.0", "medium", "CVE-2023-32681", "Unintended leak of Proxy-Authorization header")],
    ),
    (
        "urllib3",
        &[("<", "2.0.6", "medium", "CVE-2023-43804", "Cookie header leak on cross-origin redirects")],
    ),
    ("pillow", &[("<", "10.0.1", "high", "CVE-2023-44271", "Denial of service via large image")]),
    (
        "cryptography",
        &[("<", "41.0.4", "high", "CVE-2023-38325", "NULL dereference in PKCS7 parsing")],
    ),
    ("jinja2", &[("<", "3.1.3", "medium", "CVE-2024-22195", "XSS via xmlattr filter")]),
    (
        "sqlalchemy",
        &[("<", "2.0.0", "medium", "N/A", "Legacy query interface prone to injection patterns")],
    ),
    (
        "werkzeug",
        &[("<", "2.3.8", "high", "CVE-2023-46136", "Denial of service via multipart parser")],
    ),
];

fn lookup(pkg_lower: &str) -> Option<&'static [VulnEntry]> {
    VULN_DB
        .iter()
        .find(|(name, _)| *name == pkg_lower)
        .map(|(_, entries)| *entries)
}

/// Parse up to 3 dotted integer components, right-padding with zeros.
fn parse_version(v: &str) -> Option<[u32; 3]> {
    let mut parts = [0u32; 3];
    for (i, component) in v.split('.').take(3).enumerate() {
        parts[i] = component.parse().ok()?;
    }
    Some(parts)
}

fn is_version_vulnerable(installed: &str, operator: &str, vuln_version: &str) -> bool {
    let (Some(installed), Some(vuln)) = (parse_version(installed), parse_version(vuln_version))
    else {
        return false;
    };
    match operator {
        "<" => installed < vuln,
        "<=" => installed <= vuln,
        _ => false,
    }
}

/// Check declared dependencies against [`VULN_DB`].
pub fn scan(project_info: &ProjectInfo) -> Vec<RawFinding> {
    let mut findings = Vec::new();

    for (pkg_name, version_str) in &project_info.dependencies {
        let pkg_lower = pkg_name.to_lowercase();
        let Some(entries) = lookup(pkg_lower.trim()) else {
            continue;
        };

        for (op, vuln_version, severity, cve, description) in entries {
            let clean_version = version_str.trim_start_matches(['^', '~', '>', '=', '<', '!', ' ']);

            if clean_version == "*" || clean_version.is_empty() {
                findings.push(RawFinding {
                    severity: Severity::Info,
                    category: "vulnerable_dependency".to_string(),
                    title: format!("Unpinned dependency: {pkg_name}"),
                    description: format!(
                        "Package '{pkg_name}' has no pinned version. Known vulnerability exists \
                         in versions {op} {vuln_version}: {description}"
                    ),
                    location: Some(Location::Dependency {
                        package: pkg_name.clone(),
                        version: version_str.clone(),
                    }),
                    evidence: Some(json!({"cve": cve, "vulnerable_below": vuln_version})),
                    remediation: format!("Pin {pkg_name} to version {vuln_version} or later."),
                });
                continue;
            }

            if is_version_vulnerable(clean_version, op, vuln_version) {
                findings.push(RawFinding {
                    severity: Severity::parse(severity).unwrap_or(Severity::Medium),
                    category: "vulnerable_dependency".to_string(),
                    title: format!("Vulnerable dependency: {pkg_name}@{version_str}"),
                    description: format!(
                        "{description}. Installed version {version_str} is vulnerable \
                         (affects versions {op} {vuln_version})."
                    ),
                    location: Some(Location::Dependency {
                        package: pkg_name.clone(),
                        version: version_str.clone(),
                    }),
                    evidence: Some(json!({
                        "cve": cve,
                        "vulnerable_below": vuln_version,
                        "installed_version": version_str,
                    })),
                    remediation: format!("Upgrade {pkg_name} to version {vuln_version} or later."),
                });
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn project_with(deps: &[(&str, &str)]) -> ProjectInfo {
        let mut info = ProjectInfo::default();
        info.dependencies = deps
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        info
    }

    #[test]
    fn flags_vulnerable_pinned_version() {
        let info = project_with(&[("lodash", "4.17.20")]);
        let findings = scan(&info);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].title.contains("lodash"));
    }

    #[test]
    fn does_not_flag_patched_version() {
        let info = project_with(&[("lodash", "4.17.21")]);
        assert!(scan(&info).is_empty());
    }

    #[test]
    fn unpinned_wildcard_is_info_severity() {
        let info = project_with(&[("express", "*")]);
        let findings = scan(&info);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert!(findings[0].title.starts_with("Unpinned dependency"));
    }

    #[test]
    fn unknown_package_is_ignored() {
        let info = project_with(&[("totally-unknown-pkg", "1.0.0")]);
        assert!(scan(&info).is_empty());
    }

    #[test]
    fn version_parsing_handles_caret_and_tilde_prefixes() {
        let info = project_with(&[("axios", "^1.5.0")]);
        let findings = scan(&info);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }
}
