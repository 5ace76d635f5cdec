//! Index & cache consistency layer.
//!
//! Owns the derived structures: the player index, the per-team metadata
//! row with its bounded change log, and the moka summary cache. None of
//! it is authoritative; all of it can be dropped, and [`IndexService::rebuild`]
//! recomputes the index wholesale from the store. Incremental updates and
//! the rebuild both go through [`derive_entries`], so the two maintenance
//! paths cannot disagree about what a team's rows look like.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    ChangeCategory, ChangePayload, ChangeRecord, PlayerIndexEntry, Team, TeamMetadata, TeamRole,
    TeamState, TeamSummary,
};
use crate::store::TeamStore;

/// The one way index rows are derived from an authoritative record.
pub fn derive_entries(team: &Team) -> Vec<PlayerIndexEntry> {
    team.roster
        .iter()
        .map(|m| PlayerIndexEntry {
            team_id: team.id,
            user_id: m.user_id,
            display_name: m.display_name.clone(),
            initials: m.initials.clone(),
            role: if m.user_id == team.leader_id {
                TeamRole::Leader
            } else {
                TeamRole::Member
            },
        })
        .collect()
}

#[derive(Default)]
struct IndexState {
    by_team: HashMap<Uuid, Vec<PlayerIndexEntry>>,
    by_user: HashMap<Uuid, Vec<Uuid>>,
}

impl IndexState {
    fn put_team_rows(&mut self, team_id: Uuid, entries: Vec<PlayerIndexEntry>) {
        if let Some(old) = self.by_team.insert(team_id, entries) {
            for entry in old {
                self.unlink_user(entry.user_id, team_id);
            }
        }
        let users: Vec<Uuid> = self.by_team[&team_id].iter().map(|e| e.user_id).collect();
        for user_id in users {
            let teams = self.by_user.entry(user_id).or_default();
            if !teams.contains(&team_id) {
                teams.push(team_id);
            }
        }
    }

    fn unlink_user(&mut self, user_id: Uuid, team_id: Uuid) {
        if let Some(teams) = self.by_user.get_mut(&user_id) {
            teams.retain(|t| *t != team_id);
        }
    }
}

struct MetaEntry {
    metadata: TeamMetadata,
    log: VecDeque<ChangeRecord>,
}

pub struct IndexService {
    store: Arc<dyn TeamStore>,
    state: RwLock<IndexState>,
    meta: RwLock<HashMap<Uuid, MetaEntry>>,
    summaries: Cache<Uuid, TeamSummary>,
    change_log_capacity: usize,
}

impl IndexService {
    pub fn new(store: Arc<dyn TeamStore>, config: &Config) -> Self {
        IndexService {
            store,
            state: RwLock::new(IndexState::default()),
            meta: RwLock::new(HashMap::new()),
            summaries: Cache::builder()
                .max_capacity(config.summary_cache_capacity)
                .time_to_live(Duration::from_secs(config.summary_cache_ttl_secs))
                .build(),
            change_log_capacity: config.change_log_capacity,
        }
    }

    /// Post-commit maintenance: fold the change into the index rows,
    /// append it to the team's delta log, bump the version, invalidate
    /// the cached summary. Idempotent per payload — re-applying an
    /// upsert or removal lands on the same rows.
    pub async fn apply(
        &self,
        team_id: Uuid,
        category: ChangeCategory,
        changed_by: Option<Uuid>,
        payloads: Vec<ChangePayload>,
    ) {
        let now = Utc::now();

        {
            let mut state = self.state.write().await;
            let state = &mut *state;
            for payload in &payloads {
                match payload {
                    ChangePayload::RosterAdded { entry } => {
                        let rows = state.by_team.entry(team_id).or_default();
                        rows.retain(|e| e.user_id != entry.user_id);
                        rows.push(entry.clone());
                        let teams = state.by_user.entry(entry.user_id).or_default();
                        if !teams.contains(&team_id) {
                            teams.push(team_id);
                        }
                    }
                    ChangePayload::RosterRemoved { user_id } => {
                        if let Some(rows) = state.by_team.get_mut(&team_id) {
                            rows.retain(|e| e.user_id != *user_id);
                        }
                        state.unlink_user(*user_id, team_id);
                    }
                    ChangePayload::LeaderChanged { new_leader_id } => {
                        if let Some(rows) = state.by_team.get_mut(&team_id) {
                            for row in rows.iter_mut() {
                                row.role = if row.user_id == *new_leader_id {
                                    TeamRole::Leader
                                } else {
                                    TeamRole::Member
                                };
                            }
                        }
                    }
                    ChangePayload::ProfileUpdated { entry } => {
                        if let Some(rows) = state.by_team.get_mut(&team_id) {
                            if let Some(row) =
                                rows.iter_mut().find(|e| e.user_id == entry.user_id)
                            {
                                row.display_name = entry.display_name.clone();
                                row.initials = entry.initials.clone();
                            }
                        }
                    }
                    ChangePayload::StateChanged { state: new_state } => {
                        if *new_state == TeamState::Archived {
                            state.put_team_rows(team_id, Vec::new());
                        }
                    }
                    ChangePayload::SettingsUpdated { .. }
                    | ChangePayload::AvailabilityTouched { .. } => {}
                }
            }
        }

        {
            let mut meta = self.meta.write().await;
            let entry = meta.entry(team_id).or_insert_with(|| MetaEntry {
                metadata: TeamMetadata {
                    team_id,
                    version: 0,
                    last_active: now,
                    last_change_type: category,
                    last_changed_by: changed_by,
                },
                log: VecDeque::new(),
            });
            for payload in payloads {
                entry.metadata.version += 1;
                entry.metadata.last_active = now;
                entry.metadata.last_change_type = category;
                entry.metadata.last_changed_by = changed_by;
                entry.log.push_back(ChangeRecord {
                    version: entry.metadata.version,
                    at: now,
                    category,
                    changed_by,
                    payload,
                });
                while entry.log.len() > self.change_log_capacity {
                    entry.log.pop_front();
                }
            }
        }

        self.summaries.invalidate(&team_id).await;
    }

    /// Index-first roster lookup. A missing row set falls back to the
    /// authoritative record and backfills, so a cold or cleared index
    /// never reads as an empty roster.
    pub async fn roster_for_team(&self, team_id: Uuid) -> Result<Vec<PlayerIndexEntry>, AppError> {
        {
            let state = self.state.read().await;
            if let Some(rows) = state.by_team.get(&team_id) {
                return Ok(rows.clone());
            }
        }

        let team = self
            .store
            .get_team(team_id)
            .await?
            .ok_or_else(|| AppError::NotFound("team not found".to_string()))?;
        let entries = derive_entries(&team);
        let mut state = self.state.write().await;
        state.put_team_rows(team_id, entries.clone());
        Ok(entries)
    }

    /// Which teams a user is on, with the same fallback discipline.
    pub async fn teams_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        {
            let state = self.state.read().await;
            if let Some(teams) = state.by_user.get(&user_id) {
                return Ok(teams.clone());
            }
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
        Ok(user.teams.iter().copied().collect())
    }

    pub async fn team_summary(&self, team_id: Uuid) -> Result<TeamSummary, AppError> {
        if let Some(summary) = self.summaries.get(&team_id).await {
            return Ok(summary);
        }

        let team = self
            .store
            .get_team(team_id)
            .await?
            .ok_or_else(|| AppError::NotFound("team not found".to_string()))?;
        let version = self
            .metadata(team_id)
            .await
            .map(|m| m.version)
            .unwrap_or(0);
        let summary = TeamSummary {
            team_id,
            name: team.name.clone(),
            state: team.state,
            leader_id: team.leader_id,
            member_count: team.roster.len(),
            max_players: team.max_players,
            divisions: team.divisions.clone(),
            version,
        };
        self.summaries.insert(team_id, summary.clone()).await;
        Ok(summary)
    }

    pub async fn metadata(&self, team_id: Uuid) -> Option<TeamMetadata> {
        let meta = self.meta.read().await;
        meta.get(&team_id).map(|m| m.metadata.clone())
    }

    /// Metadata row plus the retained delta log, for the change API.
    pub async fn meta_snapshot(
        &self,
        team_id: Uuid,
    ) -> Option<(TeamMetadata, Vec<ChangeRecord>)> {
        let meta = self.meta.read().await;
        meta.get(&team_id)
            .map(|m| (m.metadata.clone(), m.log.iter().cloned().collect()))
    }

    /// Recompute the whole player index from authoritative records.
    /// Idempotent, and set-equal to what incremental maintenance builds.
    pub async fn rebuild(&self) -> Result<usize, AppError> {
        let teams = self.store.list_teams().await?;
        let mut fresh = IndexState::default();
        for team in &teams {
            fresh.by_team.insert(team.id, derive_entries(team));
        }
        for rows in fresh.by_team.values() {
            for entry in rows {
                let user_teams = fresh.by_user.entry(entry.user_id).or_default();
                if !user_teams.contains(&entry.team_id) {
                    user_teams.push(entry.team_id);
                }
            }
        }

        let count = teams.len();
        *self.state.write().await = fresh;
        self.summaries.invalidate_all();
        log::info!("player index rebuilt from {} team records", count);
        Ok(count)
    }

    /// Drop the derived structures. Nothing is lost: lookups fall back
    /// to the store and `rebuild` restores the index wholesale.
    pub async fn clear(&self) {
        *self.state.write().await = IndexState::default();
        self.summaries.invalidate_all();
    }

    /// Flat copy of all index rows, for drift checks and tests.
    pub async fn all_entries(&self) -> Vec<PlayerIndexEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<PlayerIndexEntry> =
            state.by_team.values().flatten().cloned().collect();
        entries.sort_by(|a, b| (a.team_id, a.user_id).cmp(&(b.team_id, b.user_id)));
        entries
    }
}
