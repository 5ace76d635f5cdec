pub mod event;
pub mod index;
pub mod team;
pub mod user;

pub use event::{RosterEvent, RosterEventType};
pub use index::{
    ChangeCategory, ChangePayload, ChangeRecord, PlayerIndexEntry, TeamChangeFlag, TeamChanges,
    TeamMetadata, TeamRole, TeamSnapshot, TeamSummary,
};
pub use team::{
    CreateTeamInput, CreatedTeam, JoinCode, RosterEntry, Team, TeamSettingsInput, TeamState,
};
pub use user::{ProfileInput, User};
