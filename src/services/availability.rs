use async_trait::async_trait;
use uuid::Uuid;

use crate::models::RosterEvent;

/// Seam to the availability-grid subsystem. Hooks run after the
/// authoritative transaction has committed; failures are logged by the
/// caller and never fail the operation.
#[async_trait]
pub trait AvailabilityHooks: Send + Sync {
    /// Clear the member's current-and-future grid cells. Past weeks are
    /// the subsystem's to preserve.
    async fn clear_member_cells(&self, team_id: Uuid, user_id: Uuid) -> anyhow::Result<()>;

    /// Hand the grid subsystem a roster change it may care about.
    async fn record_change(&self, team_id: Uuid, event: &RosterEvent) -> anyhow::Result<()>;
}

/// Default when no grid subsystem is wired in.
pub struct NoopAvailability;

#[async_trait]
impl AvailabilityHooks for NoopAvailability {
    async fn clear_member_cells(&self, _team_id: Uuid, _user_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_change(&self, _team_id: Uuid, _event: &RosterEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
