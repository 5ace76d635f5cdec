use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RosterEventType {
    Created,
    Joined,
    Left,
    Kicked,
    LeaderTransferred,
    Archived,
    Activated,
    Inactive,
}

impl std::fmt::Display for RosterEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RosterEventType::Created => "CREATED",
            RosterEventType::Joined => "JOINED",
            RosterEventType::Left => "LEFT",
            RosterEventType::Kicked => "KICKED",
            RosterEventType::LeaderTransferred => "LEADER_TRANSFERRED",
            RosterEventType::Archived => "ARCHIVED",
            RosterEventType::Activated => "ACTIVATED",
            RosterEventType::Inactive => "INACTIVE",
        };
        write!(f, "{}", s)
    }
}

/// One row of the append-only roster history. Rows are written inside the
/// same transaction as the mutation they describe and never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEvent {
    pub id: Uuid,
    pub team_id: Uuid,
    pub event_type: RosterEventType,
    pub user_id: Option<Uuid>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RosterEvent {
    pub fn new(
        team_id: Uuid,
        event_type: RosterEventType,
        user_id: Option<Uuid>,
        details: Option<String>,
    ) -> Self {
        RosterEvent {
            id: Uuid::new_v4(),
            team_id,
            event_type,
            user_id,
            details,
            created_at: Utc::now(),
        }
    }
}
