//! Tool registry, HTTP probe primitives, coverage crawler, agent system
//! prompts, tool-use loop, and the robust orchestrator itself.

#![warn(missing_docs)]

/// Generic async tool registry with JSON-Schema argument validation.
pub mod registry;
/// `http_request`/`check_headers` probe primitives and the direct/tunneled
/// [`http_probe::Prober`] abstraction.
pub mod http_probe;
/// Breadth-first attack-surface crawl seeding each agent's initial context.
pub mod coverage;
/// Fixed system prompts for the four robust-mode agents.
pub mod prompts;
/// Per-agent LLM tool-use loop.
pub mod agent_loop;
/// [`vibecheck_core::coordinator::RobustRunner`] implementation tying the
/// above together.
pub mod orchestrator;

pub use orchestrator::RobustOrchestrator;
