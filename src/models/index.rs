//! Derived, non-authoritative structures: the player index, the per-team
//! metadata row with its bounded change log, and the cached summary.
//! Everything here may be dropped and rebuilt from User/Team records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::team::TeamState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Leader,
    Member,
}

/// Denormalized projection of `User.teams x Team.roster` for O(1)
/// membership lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIndexEntry {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub initials: String,
    pub role: TeamRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Roster,
    Settings,
    Availability,
    Profile,
}

/// Version row clients poll to learn whether their snapshot is stale.
/// The version counter is independent of the Team record's own timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMetadata {
    pub team_id: Uuid,
    pub version: u64,
    pub last_active: DateTime<Utc>,
    pub last_change_type: ChangeCategory,
    pub last_changed_by: Option<Uuid>,
}

/// Minimal payload a client needs to apply one delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangePayload {
    RosterAdded { entry: PlayerIndexEntry },
    RosterRemoved { user_id: Uuid },
    LeaderChanged { new_leader_id: Uuid },
    SettingsUpdated { fields: Vec<String> },
    StateChanged { state: TeamState },
    AvailabilityTouched { cells: Vec<String> },
    ProfileUpdated { entry: PlayerIndexEntry },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub version: u64,
    pub at: DateTime<Utc>,
    pub category: ChangeCategory,
    pub changed_by: Option<Uuid>,
    pub payload: ChangePayload,
}

/// Cached read-model for list views; invalidated on every recorded change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub team_id: Uuid,
    pub name: String,
    pub state: TeamState,
    pub leader_id: Uuid,
    pub member_count: usize,
    pub max_players: u32,
    pub divisions: BTreeSet<String>,
    pub version: u64,
}

/// Answer to `getChangesSince`. `snapshot` is populated only for callers
/// with no usable prior version (`Initial`, or a version older than the
/// retained log — flagged by `full_resync`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamChanges {
    pub team_id: Uuid,
    pub changed: bool,
    pub current_version: u64,
    pub categories: BTreeSet<ChangeCategory>,
    pub deltas: Vec<ChangeRecord>,
    pub full_resync: bool,
    pub snapshot: Option<TeamSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSnapshot {
    pub summary: TeamSummary,
    pub roster: Vec<PlayerIndexEntry>,
}

/// One per-team flag for the batch polling call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamChangeFlag {
    pub team_id: Uuid,
    pub changed: bool,
    pub current_version: u64,
}
