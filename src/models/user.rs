use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::validation::MAX_TEAMS_PER_USER;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub initials: String,
    pub discord_handle: Option<String>,
    /// Membership markers; legacy records stored this as a map of
    /// teamId -> bool, current records as a plain list. Both shapes
    /// normalize into the set here, before any invariant check runs.
    #[serde(deserialize_with = "deserialize_team_set")]
    pub teams: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        id: Uuid,
        display_name: String,
        initials: String,
        discord_handle: Option<String>,
    ) -> Self {
        let now = Utc::now();
        User {
            id,
            display_name,
            initials,
            discord_handle,
            teams: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_join_another_team(&self) -> bool {
        self.teams.len() < MAX_TEAMS_PER_USER
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TeamSetRepr {
    List(Vec<Uuid>),
    Flags(BTreeMap<Uuid, bool>),
}

fn deserialize_team_set<'de, D>(deserializer: D) -> Result<BTreeSet<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match TeamSetRepr::deserialize(deserializer)? {
        TeamSetRepr::List(ids) => ids.into_iter().collect(),
        TeamSetRepr::Flags(map) => map
            .into_iter()
            .filter_map(|(id, member)| member.then_some(id))
            .collect(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub display_name: Option<String>,
    pub initials: Option<String>,
    pub discord_handle: Option<String>,
}
