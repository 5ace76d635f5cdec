use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{DEFAULT_MAX_PLAYERS, JOIN_CODE_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamState {
    Active,
    Inactive,
    Archived,
}

impl std::fmt::Display for TeamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeamState::Active => write!(f, "active"),
            TeamState::Inactive => write!(f, "inactive"),
            TeamState::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for TeamState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TeamState::Active),
            "inactive" => Ok(TeamState::Inactive),
            "archived" => Ok(TeamState::Archived),
            _ => Err(format!("Invalid TeamState: {}", s)),
        }
    }
}

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCode {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

impl JoinCode {
    /// A fresh random code. Uniqueness across teams is the store's
    /// business, checked transactionally by the caller.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..JOIN_CODE_LEN)
            .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
            .collect();
        JoinCode {
            code,
            issued_at: Utc::now(),
        }
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.code.eq_ignore_ascii_case(presented.trim())
    }

    pub fn is_expired(&self, ttl_hours: i64, now: DateTime<Utc>) -> bool {
        self.issued_at + Duration::hours(ttl_hours) < now
    }
}

/// Member snapshot as it appeared at join time; kept in sync with the
/// profile by the profile-update path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub initials: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub leader_id: Uuid,
    pub max_players: u32,
    pub join_code: JoinCode,
    pub divisions: BTreeSet<String>,
    pub state: TeamState,
    pub roster: Vec<RosterEntry>,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Team {
    pub fn new(
        name: String,
        divisions: BTreeSet<String>,
        max_players: u32,
        join_code: JoinCode,
        creator: RosterEntry,
    ) -> Self {
        let now = Utc::now();
        Team {
            id: Uuid::new_v4(),
            name,
            leader_id: creator.user_id,
            max_players,
            join_code,
            divisions,
            state: TeamState::Active,
            roster: vec![creator],
            logo_url: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.max_players as usize
    }

    pub fn member(&self, user_id: Uuid) -> Option<&RosterEntry> {
        self.roster.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.member(user_id).is_some()
    }

    pub fn initials_taken(&self, initials: &str) -> bool {
        self.roster.iter().any(|m| m.initials == initials)
    }

    /// Removes and returns the member's snapshot, preserving roster order.
    pub fn remove_member(&mut self, user_id: Uuid) -> Option<RosterEntry> {
        let pos = self.roster.iter().position(|m| m.user_id == user_id)?;
        Some(self.roster.remove(pos))
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamInput {
    pub name: String,
    pub divisions: Vec<String>,
    pub max_players: Option<u32>,
}

impl CreateTeamInput {
    pub fn max_players_or_default(&self) -> u32 {
        self.max_players.unwrap_or(DEFAULT_MAX_PLAYERS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSettingsInput {
    pub name: Option<String>,
    pub divisions: Option<Vec<String>>,
    pub max_players: Option<u32>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTeam {
    pub team_id: Uuid,
    pub join_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(initials: &str) -> RosterEntry {
        RosterEntry {
            user_id: Uuid::new_v4(),
            display_name: "Someone".to_string(),
            initials: initials.to_string(),
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn generated_codes_have_the_right_shape() {
        for _ in 0..32 {
            let code = JoinCode::generate();
            assert_eq!(code.code.len(), JOIN_CODE_LEN);
            assert!(code.code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_matching_ignores_case_and_whitespace() {
        let code = JoinCode {
            code: "AB12CD".to_string(),
            issued_at: Utc::now(),
        };
        assert!(code.matches("ab12cd"));
        assert!(code.matches("  AB12CD "));
        assert!(!code.matches("AB12CE"));
    }

    #[test]
    fn code_expiry_is_ttl_based() {
        let code = JoinCode {
            code: "AB12CD".to_string(),
            issued_at: Utc::now() - Duration::hours(100),
        };
        assert!(code.is_expired(72, Utc::now()));
        assert!(!code.is_expired(101, Utc::now()));
    }

    #[test]
    fn remove_member_preserves_order() {
        let (a, b, c) = (entry("AAA"), entry("BBB"), entry("CCC"));
        let mut team = Team::new(
            "Alpha".to_string(),
            BTreeSet::from(["1".to_string()]),
            10,
            JoinCode::generate(),
            a.clone(),
        );
        team.roster.push(b.clone());
        team.roster.push(c.clone());

        let removed = team.remove_member(b.user_id).unwrap();
        assert_eq!(removed.user_id, b.user_id);
        let ids: Vec<Uuid> = team.roster.iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec![a.user_id, c.user_id]);
        assert!(team.remove_member(b.user_id).is_none());
    }

    #[test]
    fn fullness_tracks_max_players() {
        let mut team = Team::new(
            "Alpha".to_string(),
            BTreeSet::from(["1".to_string()]),
            2,
            JoinCode::generate(),
            entry("AAA"),
        );
        assert!(!team.is_full());
        team.roster.push(entry("BBB"));
        assert!(team.is_full());
    }
}
