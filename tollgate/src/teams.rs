//! Team existence and suspension checks, consumed from the surrounding
//! platform. The engine records team IDs on jobs and ledger rows but does
//! not own team data; callers inject whatever directory the deployment has.

use crate::types::TeamId;
use async_trait::async_trait;

/// Boolean gate the job surface consults before opening work for a team.
#[async_trait]
pub trait TeamGate: Send + Sync {
    /// Whether the team exists and is not suspended.
    async fn is_active(&self, team_id: TeamId) -> anyhow::Result<bool>;
}

/// Gate for single-tenant and development deployments: every team is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllTeams;

#[async_trait]
impl TeamGate for AllowAllTeams {
    async fn is_active(&self, _team_id: TeamId) -> anyhow::Result<bool> {
        Ok(true)
    }
}
