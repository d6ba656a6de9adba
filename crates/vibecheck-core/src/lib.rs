//! VibeCheck core — identifiers, data model, persistence, redaction/entropy,
//! deterministic analyzers, the lightweight orchestrator, and the assessment
//! lifecycle coordinator.
//!
//! # Modules
//!
//! - [`ids`] — prefixed opaque identifier minting
//! - [`models`] — Assessment/Finding/AgentLog/TunnelSession data model
//! - [`persistence`] — SQLite-backed durable store
//! - [`redaction`] — secret pattern table + Shannon entropy
//! - [`repo`] — file acquisition, exclusion rules, project-info detection
//! - [`analyzers`] — dependency, pattern, secret, config analyzers
//! - [`lightweight`] — the lightweight scan orchestrator
//! - [`coordinator`] — assessment create/list/get/delete/rerun

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod analyzers;
pub mod coordinator;
pub mod ids;
pub mod lightweight;
pub mod models;
pub mod persistence;
pub mod redaction;
pub mod repo;

pub use coordinator::Coordinator;
pub use ids::generate_id;
pub use models::*;
pub use persistence::Store;

use thiserror::Error;

/// Taxonomy of failures surfaced by VibeCheck, per the error-handling design:
/// every variant carries enough to build `{type, code, http_status, message, param?}`.
#[derive(Error, Debug)]
pub enum VibeCheckError {
    /// Unknown assessment, finding, agent, or tunnel session.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Kind of resource that was missing (e.g. "assessment").
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Malformed request: bad mode, missing required field, unknown agent, etc.
    #[error("{message}")]
    Validation {
        /// Machine-readable code, e.g. `INVALID_MODE`.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
        /// Offending field name, if applicable.
        param: Option<&'static str>,
    },

    /// Assessment still in progress, or an idempotency key collision.
    #[error("{message}")]
    Conflict {
        /// Machine-readable code, e.g. `ASSESSMENT_IN_PROGRESS`.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
        /// HTTP status this conflict should map to (400 or 409 depending on cause).
        http_status: u16,
    },

    /// Tunnel session missing, or the live channel rejected the request.
    #[error("{message}")]
    Tunnel {
        /// Machine-readable code, e.g. `TUNNEL_NOT_CONNECTED`.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// A collaborator outside the process failed (clone, LLM vendor, network probe).
    #[error("{message}")]
    External {
        /// Machine-readable code, e.g. `CLONE_FAILED`.
        code: &'static str,
        /// Human-readable explanation, already truncated where required.
        message: String,
    },

    /// IO failure not otherwise classified.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence-layer failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl VibeCheckError {
    /// Not-found constructor matching `VibeCheckError.not_found` in the source system.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// `{type}` tag for the error-shape contract (`not_found`, `validation_error`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation_error",
            Self::Conflict { .. } => "conflict",
            Self::Tunnel { .. } => "tunnel_error",
            Self::External { .. } => "external_error",
            Self::Io(_) | Self::Database(_) | Self::Serialization(_) => "internal_error",
        }
    }

    /// Machine-readable uppercase code, suitable for `assessment.error_type`.
    pub fn code(&self) -> String {
        match self {
            Self::NotFound { resource, .. } => format!("{}_NOT_FOUND", resource.to_uppercase()),
            Self::Validation { code, .. } => code.to_string(),
            Self::Conflict { code, .. } => code.to_string(),
            Self::Tunnel { code, .. } => code.to_string(),
            Self::External { code, .. } => code.to_string(),
            Self::Io(_) => "IO_ERROR".to_string(),
            Self::Database(_) => "DATABASE_ERROR".to_string(),
            Self::Serialization(_) => "SERIALIZATION_ERROR".to_string(),
        }
    }

    /// HTTP status a REST boundary should translate this into.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation { .. } => 400,
            Self::Conflict { http_status, .. } => *http_status,
            Self::Tunnel { code, .. } => {
                if *code == "TARGET_UNREACHABLE" {
                    502
                } else {
                    400
                }
            }
            Self::External { .. } => 502,
            Self::Io(_) | Self::Database(_) | Self::Serialization(_) => 500,
        }
    }

    /// `error_message` truncated to 500 chars, the limit the coordinator persists.
    pub fn truncated_message(&self) -> String {
        let full = self.to_string();
        if full.len() > 500 {
            full.chars().take(500).collect()
        } else {
            full
        }
    }
}

/// Result type alias using [`VibeCheckError`].
pub type Result<T> = std::result::Result<T, VibeCheckError>;
