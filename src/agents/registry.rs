//! Verification agent registry
//!
//! The dispatcher asks a registry for the active agent set once per request.
//! Every call returns a fresh snapshot, so agents added or deactivated between
//! requests take effect on the next one without a restart.
//!
//! ## Sources
//!
//! - [`ConfigAgentRegistry`]: `[agents.*]` tables in `veriface.toml`, picked up
//!   by the hot-reloading [`ConfigManager`]
//! - [`crate::db::TursoClient`]: the `agents` table in the audit database
//! - [`StaticAgentRegistry`]: a fixed list, for tests and one-shot CLI runs

use crate::types::{AgentDescriptor, Result};
use crate::utils::toml_config::ConfigManager;
use async_trait::async_trait;
use std::sync::Arc;

/// Source of the active verification agent set.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Active agents ordered by name. Errors propagate to the caller unchanged.
    async fn list_active_agents(&self) -> Result<Vec<AgentDescriptor>>;
}

/// Registry over a fixed list of agents
#[derive(Debug, Clone, Default)]
pub struct StaticAgentRegistry {
    agents: Vec<AgentDescriptor>,
}

impl StaticAgentRegistry {
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl AgentRegistry for StaticAgentRegistry {
    async fn list_active_agents(&self) -> Result<Vec<AgentDescriptor>> {
        let mut active: Vec<AgentDescriptor> =
            self.agents.iter().filter(|a| a.active).cloned().collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }
}

/// Registry backed by the `[agents.*]` section of the live configuration
pub struct ConfigAgentRegistry {
    config_manager: Arc<ConfigManager>,
}

impl ConfigAgentRegistry {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager }
    }
}

#[async_trait]
impl AgentRegistry for ConfigAgentRegistry {
    async fn list_active_agents(&self) -> Result<Vec<AgentDescriptor>> {
        Ok(self.config_manager.config().active_agents())
    }
}
