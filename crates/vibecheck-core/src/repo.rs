//! File acquisition and project-info detection for the lightweight pipeline.

use crate::models::{ProjectInfo, ScannedFile};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Source-file extensions the deterministic code analyzers look at.
pub const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".vue", ".svelte", ".rb", ".php", ".java", ".go",
];

/// Extensions treated as configuration for the config analyzer.
pub const CONFIG_EXTENSIONS: &[&str] = &[".yml", ".yaml", ".json", ".toml", ".env"];

/// Filenames (no extension match needed) the config analyzer always reads.
pub const CONFIG_FILENAMES: &[&str] = &[
    ".env",
    ".gitignore",
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
    "Cargo.toml",
    "next.config.js",
    "next.config.ts",
    "next.config.mjs",
];

/// Directories never descended into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".pytest_cache",
    ".idea",
    ".vscode",
];

/// Files larger than this are skipped outright (matches the original scanner).
pub const MAX_FILE_SIZE: u64 = 100 * 1024;

fn is_relevant(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if CONFIG_FILENAMES.contains(&name) {
        return true;
    }
    let lower = name.to_lowercase();
    CODE_EXTENSIONS
        .iter()
        .chain(CONFIG_EXTENSIONS.iter())
        .any(|ext| lower.ends_with(ext))
}

/// Walks `root`, filters out `SKIP_DIRS`, skips oversized files, and reads the
/// rest into memory (lossy UTF-8) — mirrors the original local-files ingestion
/// path used by both the clone acquirer and inline-file acquirer.
pub fn scan_files(root: &Path) -> crate::Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.file_type().is_dir() {
                let name = e.file_name().to_str().unwrap_or_default();
                return !SKIP_DIRS.contains(&name);
            }
            true
        })
    {
        let entry = entry.map_err(|e| crate::VibeCheckError::External {
            code: "WALK_FAILED",
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_relevant(path) {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > MAX_FILE_SIZE {
            debug!(file = %relative, size = metadata.len(), "skipping oversized file");
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %relative, error = %e, "failed to read file");
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        files.push(ScannedFile {
            path: relative,
            content,
        });
    }

    Ok(files)
}

/// Apply the same relevance/size filtering `scan_files` applies during
/// traversal, to a caller-supplied inline file list (the `files`-instead-of-
/// `repo_url` path of assessment creation).
pub fn filter_inline_files(files: Vec<crate::models::InlineFile>) -> Vec<ScannedFile> {
    files
        .into_iter()
        .filter(|f| {
            is_relevant(Path::new(&f.path)) && (f.content.len() as u64) <= MAX_FILE_SIZE
        })
        .map(|f| ScannedFile {
            path: f.path,
            content: f.content,
        })
        .collect()
}

/// Read a single repo-relative path, rejecting anything that would escape
/// `root` (`..`, absolute paths, symlink traversal after canonicalization).
pub fn read_file_safe(root: &Path, relative_path: &str) -> crate::Result<Option<String>> {
    if relative_path.contains("..") || Path::new(relative_path).is_absolute() {
        return Err(crate::VibeCheckError::Validation {
            code: "INVALID_PATH",
            message: format!("invalid path: {relative_path}"),
            param: None,
        });
    }

    let full_path = root.join(relative_path);
    if !full_path.exists() {
        return Ok(None);
    }

    let canonical_full = full_path
        .canonicalize()
        .map_err(crate::VibeCheckError::Io)?;
    let canonical_root = root.canonicalize().map_err(crate::VibeCheckError::Io)?;
    if !canonical_full.starts_with(&canonical_root) {
        return Err(crate::VibeCheckError::Validation {
            code: "INVALID_PATH",
            message: format!("path escapes repository root: {relative_path}"),
            param: None,
        });
    }

    let bytes = std::fs::read(&canonical_full).map_err(crate::VibeCheckError::Io)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn find_file<'a>(files: &'a [ScannedFile], name: &str) -> Option<&'a ScannedFile> {
    files.iter().find(|f| {
        Path::new(&f.path)
            .file_name()
            .and_then(|n| n.to_str())
            == Some(name)
            && !f.path.contains('/')
    })
}

/// Detect language/framework/dependency facts from the manifests present in
/// `files`, following the original scanner's strict per-manifest precedence.
pub fn detect_project_info(files: &[ScannedFile]) -> ProjectInfo {
    let mut info = ProjectInfo::default();

    if let Some(pkg) = find_file(files, "package.json") {
        info.language = Some("javascript".to_string());
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&pkg.content) {
            let mut deps: HashMap<String, String> = HashMap::new();
            for key in ["dependencies", "devDependencies"] {
                if let Some(obj) = v.get(key).and_then(|d| d.as_object()) {
                    for (name, version) in obj {
                        deps.insert(
                            name.clone(),
                            version.as_str().unwrap_or_default().to_string(),
                        );
                    }
                }
            }
            info.framework = if deps.contains_key("next") {
                Some("nextjs".to_string())
            } else if deps.contains_key("express") {
                Some("express".to_string())
            } else if deps.contains_key("react") {
                Some("react".to_string())
            } else if deps.contains_key("vue") {
                Some("vue".to_string())
            } else if deps.contains_key("@angular/core") {
                Some("angular".to_string())
            } else if deps.contains_key("svelte") {
                Some("svelte".to_string())
            } else if deps.contains_key("fastify") {
                Some("fastify".to_string())
            } else if deps.contains_key("hono") {
                Some("hono".to_string())
            } else {
                None
            };
            info.dependencies = deps;
        }
    }

    if let Some(req) = find_file(files, "requirements.txt") {
        info.language = Some("python".to_string());
        for line in req.content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            for sep in ["==", ">=", "<=", "~=", "!="] {
                if let Some((name, version)) = line.split_once(sep) {
                    info.dependencies
                        .insert(name.trim().to_string(), version.trim().to_string());
                    break;
                }
            }
            if !line.contains("==")
                && !line.contains(">=")
                && !line.contains("<=")
                && !line.contains("~=")
                && !line.contains("!=")
            {
                info.dependencies
                    .insert(line.to_string(), String::new());
            }
        }
        info.framework = if info.dependencies.contains_key("flask") {
            Some("flask".to_string())
        } else if info.dependencies.contains_key("django") {
            Some("django".to_string())
        } else if info.dependencies.contains_key("fastapi") {
            Some("fastapi".to_string())
        } else {
            info.framework.clone()
        };
    }

    if let Some(pyproject) = find_file(files, "pyproject.toml") {
        info.language.get_or_insert("python".to_string());
        for line in pyproject.content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().trim_matches('"');
                let value = value.trim().trim_matches('"');
                let looks_like_version = value
                    .chars()
                    .any(|c| "0123456789.><=~^".contains(c));
                if !key.is_empty() && !value.is_empty() && !key.contains('[') && looks_like_version
                {
                    info.dependencies
                        .entry(key.to_string())
                        .or_insert_with(|| value.to_string());
                }
            }
        }
    }

    if let Some(gomod) = find_file(files, "go.mod") {
        info.language = Some("go".to_string());
        for line in gomod.content.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("require ") {
                let mut parts = rest.split_whitespace();
                if let (Some(name), Some(version)) = (parts.next(), parts.next()) {
                    info.dependencies
                        .insert(name.to_string(), version.to_string());
                }
            }
        }
    }

    if find_file(files, "Cargo.toml").is_some() {
        info.language.get_or_insert("rust".to_string());
    }

    if let Some(gitignore) = find_file(files, ".gitignore") {
        info.has_gitignore = true;
        info.gitignore_entries = gitignore
            .content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
    }

    if info.language.is_none() {
        let mut ext_counts: HashMap<String, usize> = HashMap::new();
        for f in files {
            if let Some(ext) = Path::new(&f.path).extension().and_then(|e| e.to_str()) {
                *ext_counts.entry(ext.to_string()).or_insert(0) += 1;
            }
        }
        if let Some((ext, _)) = ext_counts.into_iter().max_by_key(|(_, c)| *c) {
            info.language = Some(ext);
        }
    }

    info
}

/// Remove a cloned repository's scratch directory, ignoring missing-path errors.
pub async fn cleanup_clone(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to clean up clone directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scans_relevant_files_and_skips_node_modules() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.py"), "print(1)").unwrap();
        std::fs::create_dir(temp.path().join("node_modules")).unwrap();
        std::fs::write(temp.path().join("node_modules/x.js"), "ignored").unwrap();
        std::fs::write(temp.path().join("README.md"), "not relevant").unwrap();

        let files = scan_files(temp.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"app.py"));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
        assert!(!paths.contains(&"README.md"));
    }

    #[test]
    fn filter_inline_files_drops_irrelevant_and_oversized() {
        let files = vec![
            crate::models::InlineFile {
                path: "app.py".to_string(),
                content: "print(1)".to_string(),
            },
            crate::models::InlineFile {
                path: "README.md".to_string(),
                content: "not relevant".to_string(),
            },
            crate::models::InlineFile {
                path: "huge.py".to_string(),
                content: "x".repeat((MAX_FILE_SIZE as usize) + 1),
            },
        ];
        let kept = filter_inline_files(files);
        let paths: Vec<&str> = kept.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.py"]);
    }

    #[test]
    fn detects_next_framework_over_react() {
        let files = vec![ScannedFile {
            path: "package.json".to_string(),
            content: r#"{"dependencies": {"next": "14.0.0", "react": "18.0.0"}}"#.to_string(),
        }];
        let info = detect_project_info(&files);
        assert_eq!(info.framework.as_deref(), Some("nextjs"));
    }

    #[test]
    fn parses_requirements_txt_versions() {
        let files = vec![ScannedFile {
            path: "requirements.txt".to_string(),
            content: "flask==2.0.1\n# comment\nrequests>=2.25.0\n".to_string(),
        }];
        let info = detect_project_info(&files);
        assert_eq!(info.dependencies.get("flask").map(String::as_str), Some("2.0.1"));
        assert_eq!(
            info.dependencies.get("requests").map(String::as_str),
            Some("2.25.0")
        );
        assert_eq!(info.framework.as_deref(), Some("flask"));
    }

    #[test]
    fn detects_django_and_fastapi_over_requirements_txt() {
        let files = vec![ScannedFile {
            path: "requirements.txt".to_string(),
            content: "django==4.2\n".to_string(),
        }];
        let info = detect_project_info(&files);
        assert_eq!(info.framework.as_deref(), Some("django"));

        let files = vec![ScannedFile {
            path: "requirements.txt".to_string(),
            content: "fastapi==0.110.0\n".to_string(),
        }];
        let info = detect_project_info(&files);
        assert_eq!(info.framework.as_deref(), Some("fastapi"));
    }

    #[test]
    fn pyproject_toml_skips_comments_and_non_version_metadata() {
        let files = vec![ScannedFile {
            path: "pyproject.toml".to_string(),
            content: concat!(
                "[project]\n",
                "description = \"a web app\"\n",
                "# authors = \"someone\"\n",
                "requests = \">=2.25.0\"\n",
            )
            .to_string(),
        }];
        let info = detect_project_info(&files);
        assert!(!info.dependencies.contains_key("description"));
        assert!(!info.dependencies.contains_key("authors"));
        assert_eq!(
            info.dependencies.get("requests").map(String::as_str),
            Some(">=2.25.0")
        );
    }

    #[test]
    fn read_file_safe_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("inside.txt"), "ok").unwrap();
        assert!(read_file_safe(temp.path(), "../outside.txt").is_err());
        assert!(read_file_safe(temp.path(), "inside.txt").unwrap().is_some());
    }
}
