//! # Veriface - biometric identification orchestrator
//!
//! Veriface answers "who is in this picture, and what do the regulations say
//! about their question?" by fanning a captured image out to a set of
//! per-person verification agents, fusing the returned scores into a single
//! `identified` / `ambiguous` / `unknown` decision and, for confident
//! identifications, forwarding the caller's question to a regulations QA
//! service.
//!
//! ## Overview
//!
//! Veriface can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `veriface-server` binary
//! 2. **As a library** - Embed the [`PipelineCoordinator`] in your own service
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use veriface::{
//!     agents::StaticAgentRegistry, audit::MemoryAuditSink, qa::HttpQaClient,
//!     types::{AgentDescriptor, IdentifyRequest}, FusionPolicy, PipelineCoordinator,
//!     VerificationDispatcher,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! let audit = Arc::new(MemoryAuditSink::new());
//! let registry = Arc::new(StaticAgentRegistry::new(vec![
//!     AgentDescriptor::new("Ana", "http://localhost:33210/verify"),
//! ]));
//! let dispatcher = VerificationDispatcher::new(registry, audit.clone(), Duration::from_secs(3))?;
//! let qa = Arc::new(HttpQaClient::new(
//!     "http://localhost:8001", "normativa-rag", 5, Duration::from_secs(40), audit.clone(),
//! )?);
//! let pipeline = PipelineCoordinator::new(dispatcher, qa, audit, FusionPolicy::default());
//!
//! let result = pipeline
//!     .handle(IdentifyRequest::new(image_bytes).with_question("Library hours?"))
//!     .await?;
//! println!("{} {:?}", result.verdict.decision, result.verdict.identity.name);
//! ```
//!
//! ## Modules
//!
//! - [`agents`] - Verification agent registry
//! - [`dispatch`] - Concurrent fan-out to verification agents
//! - [`fusion`] - Pure decision fusion
//! - [`qa`] - Regulations QA client
//! - [`pipeline`] - Request coordinator
//! - [`audit`] - Access and service records
//! - [`db`] - Turso/SQLite persistence
//! - [`metrics`] - Read-side aggregation
//! - [`api`] - REST API handlers and routes
//! - `mcp` - MCP stdio server (feature `mcp`, on by default)
//! - [`auth`] - Bearer-token middleware
//! - [`types`] - Common types and error handling
//!
//! ## Configuration
//!
//! Infrastructure, fusion constants and agents are configured in
//! `veriface.toml`, which is hot-reloaded. Agent changes apply to the next
//! request; fusion and timeouts are fixed at startup.

#![warn(rustdoc::missing_crate_level_docs)]

/// Verification agent registry.
pub mod agents;
/// HTTP API handlers and routes.
pub mod api;
/// Access and service audit records.
pub mod audit;
/// Bearer-token authentication.
pub mod auth;
/// Command-line interface.
pub mod cli;
/// Database client (Turso/SQLite).
pub mod db;
/// Concurrent fan-out to verification agents.
pub mod dispatch;
/// Score fusion.
pub mod fusion;
/// MCP server (Model Context Protocol).
#[cfg(feature = "mcp")]
pub mod mcp;
/// Read-side metrics.
pub mod metrics;
/// Identify-and-answer pipeline.
pub mod pipeline;
/// Regulations QA client.
pub mod qa;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use agents::{AgentRegistry, ConfigAgentRegistry, StaticAgentRegistry};
pub use auth::ApiTokenAuth;
pub use db::TursoClient;
pub use dispatch::VerificationDispatcher;
pub use fusion::{FusionPolicy, fuse};
pub use pipeline::PipelineCoordinator;
pub use types::{AppError, Result};
pub use utils::toml_config::{ConfigManager, RegistrySource, VerifaceConfig};

use crate::audit::AuditSink;
use crate::qa::HttpQaClient;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<ConfigManager>,
    /// Audit store and metrics source
    pub db: Arc<TursoClient>,
    /// Registry the pipeline dispatches against
    pub registry: Arc<dyn AgentRegistry>,
    /// Identify-and-answer pipeline
    pub pipeline: Arc<PipelineCoordinator>,
    /// API token check
    pub auth: Arc<ApiTokenAuth>,
}

impl AppState {
    /// Wire the pipeline against `db` using the current configuration.
    pub fn new(
        config_manager: Arc<ConfigManager>,
        db: Arc<TursoClient>,
        auth: ApiTokenAuth,
    ) -> Result<Self> {
        let config = config_manager.config();
        let registry = agent_registry(&config, &config_manager, &db);
        let audit: Arc<dyn AuditSink> = db.clone();
        let pipeline = build_pipeline(&config, registry.clone(), audit)?;

        Ok(Self {
            config_manager,
            db,
            registry,
            pipeline: Arc::new(pipeline),
            auth: Arc::new(auth),
        })
    }

    /// Open the configured database and resolve the API token from the environment.
    pub async fn from_config_manager(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.config();
        let token = config.api_token()?;
        let db = Arc::new(TursoClient::from_config(&config).await?);

        Self::new(config_manager, db, ApiTokenAuth::new(token))
    }
}

/// Registry selected by `registry.source`.
pub fn agent_registry(
    config: &VerifaceConfig,
    config_manager: &Arc<ConfigManager>,
    db: &Arc<TursoClient>,
) -> Arc<dyn AgentRegistry> {
    match config.registry.source {
        RegistrySource::Config => Arc::new(ConfigAgentRegistry::new(config_manager.clone())),
        RegistrySource::Database => db.clone(),
    }
}

/// Build a pipeline from configuration. Fusion policy, timeouts and failure
/// tolerance are captured here and stay fixed for the pipeline's lifetime.
pub fn build_pipeline(
    config: &VerifaceConfig,
    registry: Arc<dyn AgentRegistry>,
    audit: Arc<dyn AuditSink>,
) -> Result<PipelineCoordinator> {
    let dispatcher =
        VerificationDispatcher::new(registry, audit.clone(), config.dispatch.timeout())?;
    let qa = HttpQaClient::new(
        &config.qa.url,
        config.qa.service_name.clone(),
        config.qa.top_k,
        config.qa.timeout(),
        audit.clone(),
    )?;

    Ok(
        PipelineCoordinator::new(dispatcher, Arc::new(qa), audit, config.fusion)
            .with_max_tolerated_failures(config.dispatch.max_tolerated_failures),
    )
}
