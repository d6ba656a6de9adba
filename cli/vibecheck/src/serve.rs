//! `vibecheck serve`: wire the assessment engine together in-process, run a
//! single assessment to completion, and print the terminal result as JSON.
//! This stands in for the REST surface (routing, pagination, request
//! validation) that fronts the engine in production; it exists so the
//! engine and the `connect` client can be exercised end-to-end from one
//! binary without that outer layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use vibecheck_agents::RobustOrchestrator;
use vibecheck_core::coordinator::{RobustRunner, TunnelLiveness};
use vibecheck_core::lightweight::ContextualAnalyzer;
use vibecheck_core::{Coordinator, CreateAssessmentRequest, Depth, Mode, Status, Store};
use vibecheck_tunnel::TunnelManager;

/// Arguments for a single one-shot assessment run.
#[derive(clap::Args)]
pub struct ServeArgs {
    /// "lightweight" or "robust".
    #[arg(long)]
    mode: String,
    /// Lightweight: repository URL to clone.
    #[arg(long)]
    repo_url: Option<String>,
    /// Robust: live target to probe.
    #[arg(long)]
    target_url: Option<String>,
    /// Robust: an existing connected tunnel session id.
    #[arg(long)]
    tunnel_session_id: Option<String>,
    /// Robust: comma-separated agent names; defaults to all four.
    #[arg(long)]
    agents: Option<String>,
    /// "quick", "standard", or "deep".
    #[arg(long, default_value = "standard")]
    depth: String,
    /// Path to the SQLite database file. Defaults to `$DATABASE_URL`, then
    /// `vibecheck.db`.
    #[arg(long, default_value_t = default_database_url())]
    database_url: String,
    /// Directory lightweight scans clone repositories into. Defaults to
    /// `$CLONE_DIR`, then `/tmp/vibecheck-repos`.
    #[arg(long, default_value_t = default_clone_dir())]
    clone_dir: String,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "vibecheck.db".to_string())
}

fn default_clone_dir() -> String {
    std::env::var("CLONE_DIR").unwrap_or_else(|_| "/tmp/vibecheck-repos".to_string())
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let mode = Mode::parse(&args.mode)
        .with_context(|| format!("unknown mode '{}': expected lightweight or robust", args.mode))?;
    let depth = Depth::parse(&args.depth)
        .with_context(|| format!("unknown depth '{}': expected quick, standard, or deep", args.depth))?;

    let store = Store::open(&args.database_url)
        .with_context(|| format!("failed to open store at {}", args.database_url))?;

    let tunnel_manager = Arc::new(TunnelManager::new());
    let tunnel_liveness: Arc<dyn TunnelLiveness> = tunnel_manager.clone();

    let contextual_analyzer = vibecheck_llm::client_from_env()
        .map(|client| Arc::new(vibecheck_llm::ContextualLlmAnalyzer::new(client)) as Arc<dyn ContextualAnalyzer>);
    let robust_runner = vibecheck_llm::gemini_client_from_env().map(|client| {
        Arc::new(RobustOrchestrator::new(client, tunnel_manager.clone())) as Arc<dyn RobustRunner>
    });

    if mode == Mode::Robust && robust_runner.is_none() {
        println!(
            "{} GEMINI_API_KEY is not set; the assessment will fail immediately with GEMINI_API_KEY_MISSING",
            style("!").yellow()
        );
    }

    let coordinator = Coordinator::new(
        store,
        PathBuf::from(&args.clone_dir),
        Some(tunnel_liveness),
        contextual_analyzer,
        robust_runner,
    );

    let agents = args.agents.as_ref().map(|raw| {
        raw.split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    });

    let request = CreateAssessmentRequest {
        mode,
        repo_url: args.repo_url,
        files: None,
        target_url: args.target_url,
        tunnel_session_id: args.tunnel_session_id,
        agents,
        depth: Some(depth),
        idempotency_key: None,
    };

    let assessment = coordinator.create(request).await?;
    println!("{} assessment {} queued", style("\u{2192}").cyan(), style(&assessment.id).bold());

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));

    let terminal = loop {
        let current = coordinator.get(&assessment.id)?;
        spinner.set_message(format!("status: {}", current.status));
        if current.status.is_terminal() {
            break current;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };
    spinner.finish_and_clear();

    let json = serde_json::to_string_pretty(&terminal).context("failed to serialize assessment")?;
    println!("{json}");

    if terminal.status == Status::Failed {
        if let Some(error_type) = &terminal.error_type {
            eprintln!(
                "{} {error_type}: {}",
                style("\u{2717}").red(),
                terminal.error_message.as_deref().unwrap_or("")
            );
            bail!("assessment {} failed", terminal.id);
        }
    }

    Ok(())
}
