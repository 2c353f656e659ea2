use async_trait::async_trait;
use serde::Serialize;

use crate::state_machine::LeadershipState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// No coordination service configured: this instance always leads.
    SingleInstance,
    Distributed,
}

/// Snapshot served by health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub identity: String,
    pub mode: DeploymentMode,
    pub state: LeadershipState,
    /// `false` in every state but Leading, Suspended and Reinitializing included.
    pub leading: bool,
    /// Whether the driver is started and still contending.
    pub healthy: bool,
    /// Identity of the current leader, if known.
    pub leader: Option<String>,
}

/// Read-only leadership surface polled by health checks.
#[async_trait]
pub trait LeadershipProbe: Send + Sync {
    fn is_leading(&self) -> bool;

    async fn health(&self) -> HealthReport;
}
