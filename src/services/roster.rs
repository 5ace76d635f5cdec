//! Roster lifecycle engine.
//!
//! Every mutating operation follows the same discipline: argument
//! validation up front, all business preconditions re-checked inside a
//! [`TxRunner`] transaction on freshly read records, and derived-data
//! plus availability-grid effects applied only after the commit. The
//! post-commit effects are best-effort; their failures are logged and
//! never fail the operation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    ChangeCategory, ChangePayload, CreateTeamInput, CreatedTeam, JoinCode, PlayerIndexEntry,
    ProfileInput, RosterEntry, RosterEvent, RosterEventType, Team, TeamRole, TeamSettingsInput,
    TeamState, User,
};
use crate::services::availability::AvailabilityHooks;
use crate::services::index::IndexService;
use crate::store::{StoreTx, TeamStore, TxRunner};
use crate::validation::{
    normalize_team_name, validate_display_name, validate_divisions, validate_initials,
    validate_join_code, validate_max_players, validate_team_name,
};

pub struct RosterService {
    store: Arc<dyn TeamStore>,
    index: Arc<IndexService>,
    availability: Arc<dyn AvailabilityHooks>,
    config: Config,
}

struct CreateOutcome {
    team: Team,
    event: RosterEvent,
}

enum JoinOutcome {
    Joined {
        team: Team,
        entry: RosterEntry,
        reactivated: bool,
        events: Vec<RosterEvent>,
    },
    /// The stored code was expired; a fresh one was committed and the
    /// presented code is now simply invalid.
    ExpiredCode,
}

struct RemovalOutcome {
    team_id: Uuid,
    removed: RosterEntry,
    archived: bool,
    events: Vec<RosterEvent>,
}

enum CodeReadOutcome {
    Current(String),
    Regenerated(String),
}

struct ProfileOutcome {
    user: User,
    touched_teams: Vec<(Uuid, PlayerIndexEntry)>,
}

impl RosterService {
    pub fn new(
        store: Arc<dyn TeamStore>,
        index: Arc<IndexService>,
        availability: Arc<dyn AvailabilityHooks>,
        config: Config,
    ) -> Self {
        RosterService {
            store,
            index,
            availability,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Create-or-update a profile. Edits to display name or initials are
    /// pushed into the user's roster snapshots on every team they are on,
    /// in the same transaction, so snapshots never drift from the profile.
    pub async fn upsert_profile(
        &self,
        user_id: Uuid,
        input: ProfileInput,
    ) -> Result<User, AppError> {
        let display_name = input
            .display_name
            .as_deref()
            .map(validate_display_name)
            .transpose()?;
        let initials = input
            .initials
            .as_deref()
            .map(validate_initials)
            .transpose()?;
        let discord_handle = input.discord_handle.clone();

        let outcome = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                let display_name = display_name.clone();
                let initials = initials.clone();
                let discord_handle = discord_handle.clone();
                Box::pin(async move {
                    profile_tx(tx, user_id, display_name, initials, discord_handle).await
                })
            },
        )
        .await?;

        for (team_id, entry) in outcome.touched_teams {
            self.index
                .apply(
                    team_id,
                    ChangeCategory::Profile,
                    Some(user_id),
                    vec![ChangePayload::ProfileUpdated { entry }],
                )
                .await;
        }
        Ok(outcome.user)
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))
    }

    // ------------------------------------------------------------------
    // Team creation and joining
    // ------------------------------------------------------------------

    pub async fn create_team(
        &self,
        input: CreateTeamInput,
        creator_id: Uuid,
    ) -> Result<CreatedTeam, AppError> {
        let name = validate_team_name(&input.name)?;
        let divisions = validate_divisions(&input.divisions)?;
        let max_players = validate_max_players(input.max_players_or_default())?;
        let code_attempts = self.config.max_code_attempts;

        let outcome = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                let name = name.clone();
                let divisions = divisions.clone();
                Box::pin(async move {
                    let user = tx.user(creator_id).await?.ok_or_else(|| {
                        AppError::FailedPrecondition("create a profile first".to_string())
                    })?;
                    if !user.can_join_another_team() {
                        return Err(AppError::FailedPrecondition(
                            "already in the maximum number of teams".to_string(),
                        ));
                    }

                    // Uniqueness re-check on fresh data; the guarded
                    // negative read makes a racing create conflict at
                    // commit instead of slipping through.
                    if tx
                        .active_team_by_name(&normalize_team_name(&name))
                        .await?
                        .is_some()
                    {
                        return Err(AppError::AlreadyExists(
                            "a team with this name already exists".to_string(),
                        ));
                    }

                    let join_code = generate_unique_code(tx, code_attempts).await?;
                    let creator = RosterEntry {
                        user_id: user.id,
                        display_name: user.display_name.clone(),
                        initials: user.initials.clone(),
                        joined_at: Utc::now(),
                    };
                    let team = Team::new(name, divisions, max_players, join_code, creator);

                    let mut user = user;
                    user.teams.insert(team.id);
                    user.updated_at = Utc::now();

                    let event = RosterEvent::new(
                        team.id,
                        RosterEventType::Created,
                        Some(creator_id),
                        Some(format!("team \"{}\" created", team.name)),
                    );
                    tx.put_user(user);
                    tx.put_team(team.clone());
                    tx.append_event(event.clone());
                    Ok(CreateOutcome { team, event })
                })
            },
        )
        .await?;

        let entry = PlayerIndexEntry {
            team_id: outcome.team.id,
            user_id: creator_id,
            display_name: outcome.team.roster[0].display_name.clone(),
            initials: outcome.team.roster[0].initials.clone(),
            role: TeamRole::Leader,
        };
        self.index
            .apply(
                outcome.team.id,
                ChangeCategory::Roster,
                Some(creator_id),
                vec![ChangePayload::RosterAdded { entry }],
            )
            .await;
        self.notify_grid(outcome.team.id, &outcome.event).await;

        Ok(CreatedTeam {
            team_id: outcome.team.id,
            join_code: outcome.team.join_code.code.clone(),
        })
    }

    pub async fn join_by_code(&self, code: &str, user_id: Uuid) -> Result<Uuid, AppError> {
        let code = validate_join_code(code)?;
        let ttl_hours = self.config.join_code_ttl_hours;
        let code_attempts = self.config.max_code_attempts;

        let outcome = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                let code = code.clone();
                Box::pin(async move {
                    join_tx(tx, code, user_id, ttl_hours, code_attempts).await
                })
            },
        )
        .await?;

        match outcome {
            JoinOutcome::Joined {
                team,
                entry,
                reactivated,
                events,
            } => {
                let mut payloads = Vec::new();
                if reactivated {
                    payloads.push(ChangePayload::StateChanged {
                        state: TeamState::Active,
                    });
                }
                payloads.push(ChangePayload::RosterAdded {
                    entry: PlayerIndexEntry {
                        team_id: team.id,
                        user_id,
                        display_name: entry.display_name.clone(),
                        initials: entry.initials.clone(),
                        role: TeamRole::Member,
                    },
                });
                self.index
                    .apply(team.id, ChangeCategory::Roster, Some(user_id), payloads)
                    .await;
                for event in &events {
                    self.notify_grid(team.id, event).await;
                }
                Ok(team.id)
            }
            JoinOutcome::ExpiredCode => {
                Err(AppError::NotFound("invalid join code".to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Leaving and removal
    // ------------------------------------------------------------------

    pub async fn leave(&self, team_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let outcome = self
            .remove_member(team_id, user_id, None, RosterEventType::Left)
            .await?;
        self.finish_removal(user_id, outcome).await;
        Ok(())
    }

    pub async fn kick(
        &self,
        team_id: Uuid,
        target_id: Uuid,
        caller_id: Uuid,
    ) -> Result<(), AppError> {
        if target_id == caller_id {
            return Err(AppError::InvalidArgument(
                "use leave to remove yourself".to_string(),
            ));
        }
        let outcome = self
            .remove_member(team_id, target_id, Some(caller_id), RosterEventType::Kicked)
            .await?;
        self.finish_removal(caller_id, outcome).await;
        Ok(())
    }

    /// Shared transactional removal path for leave and kick.
    async fn remove_member(
        &self,
        team_id: Uuid,
        target_id: Uuid,
        required_leader: Option<Uuid>,
        event_type: RosterEventType,
    ) -> Result<RemovalOutcome, AppError> {
        TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    removal_tx(tx, team_id, target_id, required_leader, event_type).await
                })
            },
        )
        .await
    }

    async fn finish_removal(&self, actor_id: Uuid, outcome: RemovalOutcome) {
        let mut payloads = vec![ChangePayload::RosterRemoved {
            user_id: outcome.removed.user_id,
        }];
        if outcome.archived {
            payloads.push(ChangePayload::StateChanged {
                state: TeamState::Archived,
            });
        }
        self.index
            .apply(
                outcome.team_id,
                ChangeCategory::Roster,
                Some(actor_id),
                payloads,
            )
            .await;

        if let Err(err) = self
            .availability
            .clear_member_cells(outcome.team_id, outcome.removed.user_id)
            .await
        {
            log::error!(
                "failed to clear availability cells for user {} on team {}: {}",
                outcome.removed.user_id,
                outcome.team_id,
                err
            );
        }
        for event in &outcome.events {
            self.notify_grid(outcome.team_id, event).await;
        }
    }

    // ------------------------------------------------------------------
    // Leadership and settings
    // ------------------------------------------------------------------

    pub async fn transfer_leadership(
        &self,
        team_id: Uuid,
        new_leader_id: Uuid,
        caller_id: Uuid,
    ) -> Result<(), AppError> {
        if new_leader_id == caller_id {
            return Err(AppError::FailedPrecondition(
                "already the team leader".to_string(),
            ));
        }

        let event = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state != TeamState::Active {
                        return Err(AppError::FailedPrecondition(
                            "team is not active".to_string(),
                        ));
                    }
                    require_leader(&team, caller_id)?;
                    if !team.is_member(new_leader_id) {
                        return Err(AppError::FailedPrecondition(
                            "new leader must be a roster member".to_string(),
                        ));
                    }

                    team.leader_id = new_leader_id;
                    team.touch(Utc::now());
                    let event = RosterEvent::new(
                        team_id,
                        RosterEventType::LeaderTransferred,
                        Some(new_leader_id),
                        Some(format!("leadership transferred by {}", caller_id)),
                    );
                    tx.put_team(team);
                    tx.append_event(event.clone());
                    Ok(event)
                })
            },
        )
        .await?;

        self.index
            .apply(
                team_id,
                ChangeCategory::Roster,
                Some(caller_id),
                vec![ChangePayload::LeaderChanged { new_leader_id }],
            )
            .await;
        self.notify_grid(team_id, &event).await;
        Ok(())
    }

    pub async fn update_settings(
        &self,
        team_id: Uuid,
        input: TeamSettingsInput,
        caller_id: Uuid,
    ) -> Result<(), AppError> {
        let name = input.name.as_deref().map(validate_team_name).transpose()?;
        let divisions = input
            .divisions
            .as_deref()
            .map(validate_divisions)
            .transpose()?;
        let max_players = input.max_players.map(validate_max_players).transpose()?;
        let logo_url = input.logo_url.clone();

        let fields = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                let name = name.clone();
                let divisions = divisions.clone();
                let logo_url = logo_url.clone();
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state != TeamState::Active {
                        return Err(AppError::FailedPrecondition(
                            "team is not active".to_string(),
                        ));
                    }
                    require_leader(&team, caller_id)?;

                    let mut fields = Vec::new();
                    if let Some(name) = name {
                        let normalized = normalize_team_name(&name);
                        if normalized != normalize_team_name(&team.name) {
                            if tx.active_team_by_name(&normalized).await?.is_some() {
                                return Err(AppError::AlreadyExists(
                                    "a team with this name already exists".to_string(),
                                ));
                            }
                        }
                        team.name = name;
                        fields.push("name".to_string());
                    }
                    if let Some(divisions) = divisions {
                        team.divisions = divisions;
                        fields.push("divisions".to_string());
                    }
                    if let Some(max_players) = max_players {
                        // Checked against the transactional read, never a
                        // pre-check: a concurrent join may have landed.
                        if (max_players as usize) < team.roster.len() {
                            return Err(AppError::FailedPrecondition(
                                "maxPlayers cannot be below the current roster size".to_string(),
                            ));
                        }
                        team.max_players = max_players;
                        fields.push("maxPlayers".to_string());
                    }
                    if let Some(logo_url) = logo_url {
                        team.logo_url = Some(logo_url);
                        fields.push("logoUrl".to_string());
                    }

                    team.touch(Utc::now());
                    tx.put_team(team);
                    Ok(fields)
                })
            },
        )
        .await?;

        self.index
            .apply(
                team_id,
                ChangeCategory::Settings,
                Some(caller_id),
                vec![ChangePayload::SettingsUpdated { fields }],
            )
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Join codes
    // ------------------------------------------------------------------

    pub async fn rotate_join_code(
        &self,
        team_id: Uuid,
        caller_id: Uuid,
    ) -> Result<String, AppError> {
        let code_attempts = self.config.max_code_attempts;

        let code = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state == TeamState::Archived {
                        return Err(AppError::FailedPrecondition(
                            "team is archived".to_string(),
                        ));
                    }
                    require_leader(&team, caller_id)?;

                    team.join_code = generate_unique_code(tx, code_attempts).await?;
                    let code = team.join_code.code.clone();
                    tx.put_team(team);
                    Ok(code)
                })
            },
        )
        .await?;

        self.index
            .apply(
                team_id,
                ChangeCategory::Settings,
                Some(caller_id),
                vec![ChangePayload::SettingsUpdated {
                    fields: vec!["joinCode".to_string()],
                }],
            )
            .await;
        Ok(code)
    }

    /// Leader-only read of the current code. An expired code is replaced
    /// and committed here, transparently; callers never see expiry.
    pub async fn current_join_code(
        &self,
        team_id: Uuid,
        caller_id: Uuid,
    ) -> Result<String, AppError> {
        let ttl_hours = self.config.join_code_ttl_hours;
        let code_attempts = self.config.max_code_attempts;

        let outcome = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state == TeamState::Archived {
                        return Err(AppError::FailedPrecondition(
                            "team is archived".to_string(),
                        ));
                    }
                    require_leader(&team, caller_id)?;

                    if team.join_code.is_expired(ttl_hours, Utc::now()) {
                        team.join_code = generate_unique_code(tx, code_attempts).await?;
                        let code = team.join_code.code.clone();
                        tx.put_team(team);
                        return Ok(CodeReadOutcome::Regenerated(code));
                    }
                    Ok(CodeReadOutcome::Current(team.join_code.code.clone()))
                })
            },
        )
        .await?;

        match outcome {
            CodeReadOutcome::Current(code) => Ok(code),
            CodeReadOutcome::Regenerated(code) => {
                self.index
                    .apply(
                        team_id,
                        ChangeCategory::Settings,
                        Some(caller_id),
                        vec![ChangePayload::SettingsUpdated {
                            fields: vec!["joinCode".to_string()],
                        }],
                    )
                    .await;
                Ok(code)
            }
        }
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Inactive -> active. A no-op on active teams and on archived teams
    /// (terminal state), so availability writers can fire it blindly.
    pub async fn reactivate(&self, team_id: Uuid) -> Result<(), AppError> {
        let event = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state != TeamState::Inactive {
                        return Ok(None);
                    }
                    team.state = TeamState::Active;
                    team.touch(Utc::now());
                    let event =
                        RosterEvent::new(team_id, RosterEventType::Activated, None, None);
                    tx.put_team(team);
                    tx.append_event(event.clone());
                    Ok(Some(event))
                })
            },
        )
        .await?;

        if let Some(event) = event {
            self.index
                .apply(
                    team_id,
                    ChangeCategory::Settings,
                    None,
                    vec![ChangePayload::StateChanged {
                        state: TeamState::Active,
                    }],
                )
                .await;
            self.notify_grid(team_id, &event).await;
        }
        Ok(())
    }

    /// The "team touched" signal from the availability subsystem: a
    /// member wrote grid cells. Touches activity, reactivates if needed,
    /// and records the touched cells for delta sync.
    pub async fn record_availability_change(
        &self,
        team_id: Uuid,
        user_id: Uuid,
        cells: Vec<String>,
    ) -> Result<(), AppError> {
        let reactivated = TxRunner::run(
            self.store.as_ref(),
            self.config.max_tx_attempts,
            move |tx| {
                Box::pin(async move {
                    let mut team = require_team(tx, team_id).await?;
                    if team.state == TeamState::Archived {
                        return Err(AppError::FailedPrecondition(
                            "team is archived".to_string(),
                        ));
                    }
                    if !team.is_member(user_id) {
                        return Err(AppError::FailedPrecondition(
                            "not a member of this team".to_string(),
                        ));
                    }

                    let reactivated = team.state == TeamState::Inactive;
                    if reactivated {
                        team.state = TeamState::Active;
                        tx.append_event(RosterEvent::new(
                            team_id,
                            RosterEventType::Activated,
                            Some(user_id),
                            None,
                        ));
                    }
                    team.touch(Utc::now());
                    tx.put_team(team);
                    Ok(reactivated)
                })
            },
        )
        .await?;

        let mut payloads = Vec::new();
        if reactivated {
            payloads.push(ChangePayload::StateChanged {
                state: TeamState::Active,
            });
        }
        payloads.push(ChangePayload::AvailabilityTouched { cells });
        self.index
            .apply(team_id, ChangeCategory::Availability, Some(user_id), payloads)
            .await;
        Ok(())
    }

    /// Scheduled staleness sweep: active teams idle past the threshold
    /// go inactive. Returns how many transitioned.
    pub async fn sweep_inactive(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let threshold = Duration::days(self.config.inactivity_threshold_days);
        let candidates: Vec<Uuid> = self
            .store
            .list_teams()
            .await?
            .into_iter()
            .filter(|t| t.state == TeamState::Active && t.last_activity_at + threshold < now)
            .map(|t| t.id)
            .collect();

        let mut swept = 0;
        for team_id in candidates {
            let transitioned = TxRunner::run(
                self.store.as_ref(),
                self.config.max_tx_attempts,
                move |tx| {
                    Box::pin(async move {
                        // Staleness re-checked on the fresh read; the
                        // scan above was advisory only.
                        let mut team = require_team(tx, team_id).await?;
                        if team.state != TeamState::Active
                            || team.last_activity_at + threshold >= now
                        {
                            return Ok(false);
                        }
                        team.state = TeamState::Inactive;
                        tx.append_event(RosterEvent::new(
                            team_id,
                            RosterEventType::Inactive,
                            None,
                            Some("inactivity sweep".to_string()),
                        ));
                        tx.put_team(team);
                        Ok(true)
                    })
                },
            )
            .await?;

            if transitioned {
                swept += 1;
                self.index
                    .apply(
                        team_id,
                        ChangeCategory::Settings,
                        None,
                        vec![ChangePayload::StateChanged {
                            state: TeamState::Inactive,
                        }],
                    )
                    .await;
            }
        }
        Ok(swept)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_team_roster(&self, team_id: Uuid) -> Result<Vec<PlayerIndexEntry>, AppError> {
        self.index.roster_for_team(team_id).await
    }

    async fn notify_grid(&self, team_id: Uuid, event: &RosterEvent) {
        if let Err(err) = self.availability.record_change(team_id, event).await {
            log::error!(
                "availability hook failed for team {} ({}): {}",
                team_id,
                event.event_type,
                err
            );
        }
    }
}

// ----------------------------------------------------------------------
// Transaction bodies shared between call sites
// ----------------------------------------------------------------------

async fn require_team(tx: &mut (dyn StoreTx + 'static), team_id: Uuid) -> Result<Team, AppError> {
    tx.team(team_id)
        .await?
        .ok_or_else(|| AppError::NotFound("team not found".to_string()))
}

fn require_leader(team: &Team, caller_id: Uuid) -> Result<(), AppError> {
    if team.leader_id != caller_id {
        return Err(AppError::PermissionDenied(
            "only the team leader may do this".to_string(),
        ));
    }
    Ok(())
}

/// Generate a code no team currently holds. The negative lookups are
/// guarded, so a racing rotation to the same code conflicts at commit.
async fn generate_unique_code(
    tx: &mut (dyn StoreTx + 'static),
    attempts: u32,
) -> Result<JoinCode, AppError> {
    for _ in 0..attempts {
        let candidate = JoinCode::generate();
        if !tx.code_in_use(&candidate.code).await? {
            return Ok(candidate);
        }
    }
    Err(AppError::internal_message(
        "could not generate a unique join code",
    ))
}

async fn profile_tx(
    tx: &mut (dyn StoreTx + 'static),
    user_id: Uuid,
    display_name: Option<String>,
    initials: Option<String>,
    discord_handle: Option<String>,
) -> Result<ProfileOutcome, AppError> {
    let now = Utc::now();
    let mut user = match tx.user(user_id).await? {
        Some(user) => user,
        None => {
            // First profile action creates the record.
            let display_name = display_name.clone().ok_or_else(|| {
                AppError::InvalidArgument("displayName is required".to_string())
            })?;
            let initials = initials.clone().ok_or_else(|| {
                AppError::InvalidArgument("initials are required".to_string())
            })?;
            let user = User::new(user_id, display_name, initials, discord_handle.clone());
            tx.put_user(user.clone());
            return Ok(ProfileOutcome {
                user,
                touched_teams: Vec::new(),
            });
        }
    };

    if let Some(display_name) = display_name {
        user.display_name = display_name;
    }
    if let Some(initials) = initials {
        user.initials = initials;
    }
    if let Some(discord_handle) = discord_handle {
        user.discord_handle = Some(discord_handle);
    }
    user.updated_at = now;

    // Push the new snapshot onto every roster the user is on.
    let mut touched_teams = Vec::new();
    let team_ids: Vec<Uuid> = user.teams.iter().copied().collect();
    for team_id in team_ids {
        let Some(mut team) = tx.team(team_id).await? else {
            continue;
        };
        if team.state == TeamState::Archived {
            continue;
        }
        if team
            .roster
            .iter()
            .any(|m| m.user_id != user_id && m.initials == user.initials)
        {
            return Err(AppError::AlreadyExists(format!(
                "initials {} are already in use on team {}",
                user.initials, team.name
            )));
        }
        let Some(member) = team.roster.iter_mut().find(|m| m.user_id == user_id) else {
            continue;
        };
        if member.display_name == user.display_name && member.initials == user.initials {
            continue;
        }
        member.display_name = user.display_name.clone();
        member.initials = user.initials.clone();
        let entry = PlayerIndexEntry {
            team_id,
            user_id,
            display_name: user.display_name.clone(),
            initials: user.initials.clone(),
            role: if team.leader_id == user_id {
                TeamRole::Leader
            } else {
                TeamRole::Member
            },
        };
        tx.put_team(team);
        touched_teams.push((team_id, entry));
    }

    tx.put_user(user.clone());
    Ok(ProfileOutcome {
        user,
        touched_teams,
    })
}

async fn join_tx(
    tx: &mut (dyn StoreTx + 'static),
    code: String,
    user_id: Uuid,
    ttl_hours: i64,
    code_attempts: u32,
) -> Result<JoinOutcome, AppError> {
    let now = Utc::now();
    let mut team = tx
        .team_by_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound("invalid join code".to_string()))?;

    // An archived team's code is dead; don't reveal that the team exists.
    if team.state == TeamState::Archived {
        return Err(AppError::NotFound("invalid join code".to_string()));
    }

    if team.join_code.is_expired(ttl_hours, now) {
        // Lazy expiry: commit a fresh code, then report the presented
        // one as invalid. No caller-visible "expired" error kind.
        team.join_code = generate_unique_code(tx, code_attempts).await?;
        tx.put_team(team);
        return Ok(JoinOutcome::ExpiredCode);
    }

    let mut user = tx.user(user_id).await?.ok_or_else(|| {
        AppError::FailedPrecondition("create a profile first".to_string())
    })?;

    if team.is_member(user_id) {
        return Err(AppError::AlreadyExists(
            "already a member of this team".to_string(),
        ));
    }
    if team.is_full() {
        return Err(AppError::FailedPrecondition("team is full".to_string()));
    }
    if !user.can_join_another_team() {
        return Err(AppError::FailedPrecondition(
            "already in the maximum number of teams".to_string(),
        ));
    }
    if team.initials_taken(&user.initials) {
        return Err(AppError::AlreadyExists(format!(
            "initials {} are already in use on this team",
            user.initials
        )));
    }

    let mut events = Vec::new();
    let reactivated = team.state == TeamState::Inactive;
    if reactivated {
        // A roster-affecting write wakes an inactive team.
        team.state = TeamState::Active;
        events.push(RosterEvent::new(
            team.id,
            RosterEventType::Activated,
            Some(user_id),
            None,
        ));
    }

    let entry = RosterEntry {
        user_id,
        display_name: user.display_name.clone(),
        initials: user.initials.clone(),
        joined_at: now,
    };
    team.roster.push(entry.clone());
    team.touch(now);
    user.teams.insert(team.id);
    user.updated_at = now;
    events.push(RosterEvent::new(
        team.id,
        RosterEventType::Joined,
        Some(user_id),
        None,
    ));

    tx.put_user(user);
    tx.put_team(team.clone());
    for event in &events {
        tx.append_event(event.clone());
    }
    Ok(JoinOutcome::Joined {
        team,
        entry,
        reactivated,
        events,
    })
}

async fn removal_tx(
    tx: &mut (dyn StoreTx + 'static),
    team_id: Uuid,
    target_id: Uuid,
    required_leader: Option<Uuid>,
    event_type: RosterEventType,
) -> Result<RemovalOutcome, AppError> {
    let now = Utc::now();
    let mut team = require_team(tx, team_id).await?;
    if team.state == TeamState::Archived {
        return Err(AppError::FailedPrecondition("team is archived".to_string()));
    }
    if let Some(caller_id) = required_leader {
        require_leader(&team, caller_id)?;
        if target_id == team.leader_id {
            return Err(AppError::FailedPrecondition(
                "the team leader cannot be kicked".to_string(),
            ));
        }
    }
    if !team.is_member(target_id) {
        return Err(AppError::FailedPrecondition(
            "not a member of this team".to_string(),
        ));
    }
    if target_id == team.leader_id && team.roster.len() > 1 {
        return Err(AppError::FailedPrecondition(
            "leader must transfer leadership first".to_string(),
        ));
    }

    let removed = team
        .remove_member(target_id)
        .ok_or_else(|| AppError::internal_message("roster entry vanished mid-transaction"))?;

    let mut events = Vec::new();
    let archived = team.roster.is_empty();
    if archived {
        // Emptying the roster archives the team in the same write.
        team.state = TeamState::Archived;
        events.push(RosterEvent::new(
            team_id,
            RosterEventType::Archived,
            Some(target_id),
            Some("last member left".to_string()),
        ));
    }
    events.push(RosterEvent::new(
        team_id,
        event_type,
        Some(target_id),
        None,
    ));
    team.touch(now);

    if let Some(mut user) = tx.user(target_id).await? {
        user.teams.remove(&team_id);
        user.updated_at = now;
        tx.put_user(user);
    }
    tx.put_team(team);
    for event in &events {
        tx.append_event(event.clone());
    }

    Ok(RemovalOutcome {
        team_id,
        removed,
        archived,
        events,
    })
}
