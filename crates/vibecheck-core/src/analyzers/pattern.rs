//! Regex-based source pattern analyzer (SQL injection, XSS, command
//! injection, insecure deserialization, debug mode, CORS, log disclosure).
//!
//! The `regex` crate has no lookaround, unlike the patterns this is grounded
//! on; the handful of rules that relied on a negative lookahead are split
//! into a base regex plus a small `suppress` closure that re-checks the
//! excluded condition against the rest of the line.

use crate::models::{Location, RawFinding, Severity};
use regex::Regex;
use std::sync::OnceLock;

struct PatternRule {
    regex: &'static str,
    severity: Severity,
    category: &'static str,
    title_template: &'static str,
    description: &'static str,
    remediation: &'static str,
    /// Given the matched line, return true if this match should be dropped
    /// (emulates the source pattern's negative lookahead).
    suppress: Option<fn(&str) -> bool>,
}

/// Suppresses only a same-line empty-string-literal assignment with no
/// whitespace between `=` and the quotes (e.g. `el.innerHTML="";`), matching
/// the original pattern's negative lookahead. Anything else — a literal with
/// content, a concatenation, or any whitespace around `=` — still flags.
fn innerhtml_empty_literal_is_suppressed(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\.innerHTML=(?:""|''|``)\s*;?\s*$"#).expect("valid regex")
    });
    re.is_match(text)
}

fn rules() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            PatternRule {
                regex: r#"(?i)(?:query|execute|exec|raw)\s*\(\s*[`"']?\s*(?:SELECT|INSERT|UPDATE|DELETE|DROP|ALTER|CREATE).*?(?:\+\s*\w|\$\{|%s|%\()"#,
                severity: Severity::Critical,
                category: "sql_injection",
                title_template: "Potential SQL injection in {file}",
                description: "Raw SQL query with dynamic input detected. String concatenation or template literals in SQL queries allow attackers to inject arbitrary SQL.",
                remediation: "Use parameterized queries or an ORM. Never concatenate user input into SQL strings.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)\.raw\s*\(.*[+$%]"#,
                severity: Severity::Critical,
                category: "sql_injection",
                title_template: "Raw query with dynamic input in {file}",
                description: "ORM .raw() method called with dynamic input. This bypasses the ORM's built-in protections.",
                remediation: "Use the ORM's query builder instead of .raw() with string interpolation.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)f["'].*(?:SELECT|INSERT|UPDATE|DELETE)\s+.*\{.*\}"#,
                severity: Severity::Critical,
                category: "sql_injection",
                title_template: "f-string SQL query in {file}",
                description: "Python f-string used to build a SQL query with embedded variables. This is a direct SQL injection vector.",
                remediation: "Use parameterized queries with placeholders (e.g., cursor.execute('SELECT * FROM users WHERE id = ?', (user_id,))).",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)\.innerHTML\s*=\s*"#,
                severity: Severity::High,
                category: "xss",
                title_template: "innerHTML assignment in {file}",
                description: "Direct innerHTML assignment with dynamic content. If user input reaches this, it enables cross-site scripting.",
                remediation: "Use textContent instead of innerHTML, or sanitize with DOMPurify.",
                suppress: Some(innerhtml_empty_literal_is_suppressed),
            },
            PatternRule {
                regex: r#"(?i)dangerouslySetInnerHTML"#,
                severity: Severity::High,
                category: "xss",
                title_template: "dangerouslySetInnerHTML in {file}",
                description: "React's dangerouslySetInnerHTML used. This bypasses React's XSS protections.",
                remediation: "Avoid dangerouslySetInnerHTML. If necessary, sanitize input with DOMPurify before rendering.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)v-html\s*="#,
                severity: Severity::High,
                category: "xss",
                title_template: "v-html directive in {file}",
                description: "Vue's v-html directive renders raw HTML. If user input is rendered, this is an XSS vector.",
                remediation: "Use v-text or {{ }} interpolation instead. Sanitize if v-html is truly needed.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)\beval\s*\("#,
                severity: Severity::Critical,
                category: "code_injection",
                title_template: "eval() usage in {file}",
                description: "eval() executes arbitrary code. If user input reaches eval, it enables remote code execution.",
                remediation: "Remove eval(). Use JSON.parse() for data, or a sandboxed interpreter if dynamic execution is truly needed.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)\bexec\s*\("#,
                severity: Severity::Critical,
                category: "code_injection",
                title_template: "exec() usage in {file}",
                description: "exec() executes arbitrary Python code. This is extremely dangerous if any user input is involved.",
                remediation: "Remove exec(). Use safer alternatives like ast.literal_eval() for data parsing.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)new\s+Function\s*\("#,
                severity: Severity::Critical,
                category: "code_injection",
                title_template: "new Function() constructor in {file}",
                description: "The Function constructor compiles and executes code from strings, similar to eval().",
                remediation: "Avoid the Function constructor. Use static function definitions.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)child_process\.exec\s*\("#,
                severity: Severity::Critical,
                category: "command_injection",
                title_template: "child_process.exec in {file}",
                description: "child_process.exec runs shell commands. If user input is included, it enables OS command injection.",
                remediation: "Use child_process.execFile() with an argument array instead of exec() with a command string.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)subprocess\.(?:call|run|Popen)\s*\(\s*(?:[^,\]]*\+|f["']|.*\.format|.*%)"#,
                severity: Severity::Critical,
                category: "command_injection",
                title_template: "subprocess with dynamic input in {file}",
                description: "subprocess called with string concatenation or formatting. This can enable OS command injection.",
                remediation: "Use subprocess with a list of arguments: subprocess.run(['cmd', arg1, arg2]) instead of a formatted string.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)os\.system\s*\("#,
                severity: Severity::Critical,
                category: "command_injection",
                title_template: "os.system() usage in {file}",
                description: "os.system() runs shell commands and is vulnerable to injection. It also doesn't capture output.",
                remediation: "Use subprocess.run() with a list of arguments instead of os.system().",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)pickle\.loads?\s*\("#,
                severity: Severity::Critical,
                category: "insecure_deserialization",
                title_template: "pickle.load/loads in {file}",
                description: "Python pickle deserializes arbitrary objects. Loading untrusted pickle data can execute arbitrary code.",
                remediation: "Use JSON or another safe serialization format. If pickle is required, only load data from fully trusted sources.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)yaml\.load\s*\([^)]*\)"#,
                severity: Severity::Critical,
                category: "insecure_deserialization",
                title_template: "Unsafe yaml.load() in {file}",
                description: "yaml.load() without SafeLoader can execute arbitrary Python code embedded in YAML.",
                remediation: "Use yaml.safe_load() or yaml.load(data, Loader=yaml.SafeLoader).",
                suppress: Some(|line: &str| line.contains("SafeLoader")),
            },
            PatternRule {
                regex: r#"(?i)req\.(?:params|query|body)\.\w+"#,
                severity: Severity::Medium,
                category: "missing_validation",
                title_template: "Unvalidated request input in {file}",
                description: "Request parameter accessed without visible validation or sanitization.",
                remediation: "Validate and sanitize all request inputs. Use a validation library like Zod, Joi, or Yup.",
                suppress: Some(|line: &str| {
                    let lower = line.to_lowercase();
                    line.contains("?.")
                        || ["parseint", "number", "validate", "sanitize", "escape", "trim", "zod", "yup", "joi"]
                            .iter()
                            .any(|kw| lower.contains(kw))
                }),
            },
            PatternRule {
                regex: r#"(?i)(?:debug|DEBUG)\s*[:=]\s*(?:true|True|1|"true")"#,
                severity: Severity::Medium,
                category: "debug_mode",
                title_template: "Debug mode enabled in {file}",
                description: "Debug mode is enabled. This may expose stack traces, internal paths, and sensitive configuration.",
                remediation: "Disable debug mode in production. Use environment variables to control debug settings.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)app\.run\s*\(.*debug\s*=\s*True"#,
                severity: Severity::Medium,
                category: "debug_mode",
                title_template: "Flask debug mode in {file}",
                description: "Flask app.run() called with debug=True. This enables the Werkzeug debugger which allows arbitrary code execution.",
                remediation: "Set debug=False in production. Use environment variable: app.run(debug=os.environ.get('DEBUG', False)).",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)(?:Access-Control-Allow-Origin|cors)\s*[:=]\s*['"]\*['"]"#,
                severity: Severity::Medium,
                category: "cors_misconfiguration",
                title_template: "Wildcard CORS in {file}",
                description: "CORS is configured to allow all origins (*). This permits any website to make authenticated requests to your API.",
                remediation: "Restrict CORS to specific trusted origins instead of using wildcard.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)cors\(\s*\)"#,
                severity: Severity::Medium,
                category: "cors_misconfiguration",
                title_template: "Default CORS (allow all) in {file}",
                description: "CORS middleware initialized without options, which may default to allowing all origins.",
                remediation: "Configure CORS with specific origins: cors({origin: ['https://yourdomain.com']}).",
                suppress: Some(|rest: &str| rest.trim_start().starts_with('(')),
            },
            PatternRule {
                regex: r#"(?i)console\.log\s*\(.*(?:password|token|secret|key|auth|credential|ssn|credit.?card)"#,
                severity: Severity::Low,
                category: "information_disclosure",
                title_template: "Sensitive data in console.log in {file}",
                description: "Sensitive data (passwords, tokens, secrets) appears to be logged to console.",
                remediation: "Remove logging of sensitive data. Use structured logging with redaction for production.",
                suppress: None,
            },
            PatternRule {
                regex: r#"(?i)(?:print|logging\.(?:debug|info|warning))\s*\(.*(?:password|token|secret|key|auth|credential)"#,
                severity: Severity::Low,
                category: "information_disclosure",
                title_template: "Sensitive data logged in {file}",
                description: "Sensitive data appears in print/logging statements.",
                remediation: "Remove sensitive data from log statements. Use structured logging with automatic redaction.",
                suppress: None,
            },
        ]
    })
}

/// Source-file extensions examined by this analyzer.
pub const CODE_EXTENSIONS: &[&str] = crate::repo::CODE_EXTENSIONS;

/// Run all pattern rules against `files`, one finding per pattern per file.
pub fn scan(files: &[crate::models::ScannedFile]) -> Vec<RawFinding> {
    let mut findings = Vec::new();

    for file in files {
        let ext = match file.path.rsplit_once('.') {
            Some((_, e)) => format!(".{e}"),
            None => String::new(),
        };
        if !CODE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        for rule in rules() {
            let Ok(re) = Regex::new(rule.regex) else {
                continue;
            };
            for (idx, line) in file.content.lines().enumerate() {
                let Some(m) = re.find(line) else { continue };
                if let Some(suppress) = rule.suppress {
                    if suppress(&line[m.end()..]) || suppress(line) {
                        continue;
                    }
                }

                findings.push(RawFinding {
                    severity: rule.severity,
                    category: rule.category.to_string(),
                    title: rule.title_template.replace("{file}", &file.path),
                    description: rule.description.to_string(),
                    location: Some(Location::File {
                        file: file.path.clone(),
                        line: idx + 1,
                        snippet: line.trim().chars().take(200).collect(),
                    }),
                    evidence: None,
                    remediation: rule.remediation.to_string(),
                });
                break; // one finding per pattern per file
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScannedFile;

    fn file(path: &str, content: &str) -> ScannedFile {
        ScannedFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn flags_eval_usage() {
        let files = vec![file("app.js", "let result = eval(userInput);")];
        let findings = scan(&files);
        assert!(findings.iter().any(|f| f.category == "code_injection"));
    }

    #[test]
    fn one_finding_per_pattern_per_file() {
        let files = vec![file(
            "app.js",
            "eval(a);\neval(b);\neval(c);",
        )];
        let findings = scan(&files);
        let eval_findings: Vec<_> = findings
            .iter()
            .filter(|f| f.title.contains("eval()"))
            .collect();
        assert_eq!(eval_findings.len(), 1);
    }

    #[test]
    fn skips_non_code_extensions() {
        let files = vec![file("notes.md", "eval(x)")];
        assert!(scan(&files).is_empty());
    }

    #[test]
    fn yaml_load_with_safe_loader_is_suppressed() {
        let files = vec![file(
            "loader.py",
            "data = yaml.load(stream, Loader=yaml.SafeLoader)",
        )];
        assert!(scan(&files).is_empty());
    }

    #[test]
    fn innerhtml_literal_assignment_is_flagged() {
        let files = vec![file("view.js", "el.innerHTML = \"static text\";")];
        assert!(findings_has_category(&scan(&files), "xss"));
    }

    #[test]
    fn innerhtml_concatenation_is_flagged() {
        let files = vec![file("view.js", "el.innerHTML = '<div>' + x + '</div>';")];
        assert!(findings_has_category(&scan(&files), "xss"));
    }

    #[test]
    fn innerhtml_empty_string_reset_is_suppressed() {
        let files = vec![file("view.js", "el.innerHTML=\"\";")];
        assert!(scan(&files).iter().all(|f| f.category != "xss"));
    }

    #[test]
    fn wildcard_cors_flagged() {
        let files = vec![file("server.js", "cors: '*'")];
        assert!(findings_has_category(&scan(&files), "cors_misconfiguration"));
    }

    fn findings_has_category(findings: &[RawFinding], category: &str) -> bool {
        findings.iter().any(|f| f.category == category)
    }
}
