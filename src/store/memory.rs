//! Optimistic in-memory backend. Records carry versions; a transaction
//! remembers the version (or absence) of everything it read and the
//! commit re-verifies all of it under one lock before applying writes.
//! Transactions touching disjoint records never conflict.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{RosterEvent, Team, TeamState, User};
use crate::store::{CommitError, StoreTx, TeamStore};
use crate::validation::normalize_team_name;

#[derive(Debug, Clone)]
struct Versioned<T> {
    value: T,
    version: u64,
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, Versioned<User>>,
    teams: HashMap<Uuid, Versioned<Team>>,
    events: Vec<RosterEvent>,
    next_version: u64,
}

impl MemoryInner {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn team_id_by_code(&self, code: &str) -> Option<Uuid> {
        self.teams
            .values()
            .find(|t| t.value.join_code.code.eq_ignore_ascii_case(code))
            .map(|t| t.value.id)
    }

    fn active_team_id_by_name(&self, normalized: &str) -> Option<Uuid> {
        self.teams
            .values()
            .find(|t| {
                t.value.state == TeamState::Active
                    && normalize_team_name(&t.value.name) == normalized
            })
            .map(|t| t.value.id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            guards: Vec::new(),
            writes: Vec::new(),
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&id).map(|u| u.value.clone()))
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.teams.get(&id).map(|t| t.value.clone()))
    }

    async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.teams.values().map(|t| t.value.clone()).collect())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().map(|u| u.value.clone()).collect())
    }

    async fn events_for_team(&self, team_id: Uuid) -> Result<Vec<RosterEvent>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.team_id == team_id)
            .cloned()
            .collect())
    }
}

/// What a transaction observed; verified at commit time.
enum ReadGuard {
    UserVersion(Uuid, Option<u64>),
    TeamVersion(Uuid, Option<u64>),
    /// Which team (if any) owned this code when it was looked up.
    CodeOwner(String, Option<Uuid>),
    /// Which active team (if any) held this normalized name.
    ActiveName(String, Option<Uuid>),
}

enum StagedWrite {
    PutUser(User),
    PutTeam(Team),
    AppendEvent(RosterEvent),
}

struct MemoryTx {
    inner: Arc<Mutex<MemoryInner>>,
    guards: Vec<ReadGuard>,
    writes: Vec<StagedWrite>,
}

impl MemoryTx {
    fn staged_user(&self, id: Uuid) -> Option<User> {
        self.writes.iter().rev().find_map(|w| match w {
            StagedWrite::PutUser(u) if u.id == id => Some(u.clone()),
            _ => None,
        })
    }

    fn staged_team(&self, id: Uuid) -> Option<Team> {
        self.writes.iter().rev().find_map(|w| match w {
            StagedWrite::PutTeam(t) if t.id == id => Some(t.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, AppError> {
        if let Some(user) = self.staged_user(id) {
            return Ok(Some(user));
        }
        let inner = self.inner.lock().await;
        let hit = inner.users.get(&id);
        self.guards
            .push(ReadGuard::UserVersion(id, hit.map(|u| u.version)));
        Ok(hit.map(|u| u.value.clone()))
    }

    async fn team(&mut self, id: Uuid) -> Result<Option<Team>, AppError> {
        if let Some(team) = self.staged_team(id) {
            return Ok(Some(team));
        }
        let inner = self.inner.lock().await;
        let hit = inner.teams.get(&id);
        self.guards
            .push(ReadGuard::TeamVersion(id, hit.map(|t| t.version)));
        Ok(hit.map(|t| t.value.clone()))
    }

    async fn team_by_code(&mut self, code: &str) -> Result<Option<Team>, AppError> {
        // Staged teams win: a rotation inside this transaction already
        // moved the code.
        for w in self.writes.iter().rev() {
            if let StagedWrite::PutTeam(t) = w {
                if t.join_code.code.eq_ignore_ascii_case(code) {
                    return Ok(Some(t.clone()));
                }
            }
        }
        let inner = self.inner.lock().await;
        let owner = inner.team_id_by_code(code);
        self.guards
            .push(ReadGuard::CodeOwner(code.to_uppercase(), owner));
        match owner {
            Some(id) => {
                let hit = inner.teams.get(&id);
                self.guards
                    .push(ReadGuard::TeamVersion(id, hit.map(|t| t.version)));
                Ok(hit.map(|t| t.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn active_team_by_name(&mut self, normalized: &str) -> Result<Option<Team>, AppError> {
        let inner = self.inner.lock().await;
        let owner = inner.active_team_id_by_name(normalized);
        self.guards
            .push(ReadGuard::ActiveName(normalized.to_string(), owner));
        match owner {
            Some(id) => {
                let hit = inner.teams.get(&id);
                self.guards
                    .push(ReadGuard::TeamVersion(id, hit.map(|t| t.version)));
                Ok(hit.map(|t| t.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn code_in_use(&mut self, code: &str) -> Result<bool, AppError> {
        for w in self.writes.iter().rev() {
            if let StagedWrite::PutTeam(t) = w {
                if t.join_code.code.eq_ignore_ascii_case(code) {
                    return Ok(true);
                }
            }
        }
        let inner = self.inner.lock().await;
        let owner = inner.team_id_by_code(code);
        self.guards
            .push(ReadGuard::CodeOwner(code.to_uppercase(), owner));
        Ok(owner.is_some())
    }

    fn put_user(&mut self, user: User) {
        self.writes.push(StagedWrite::PutUser(user));
    }

    fn put_team(&mut self, team: Team) {
        self.writes.push(StagedWrite::PutTeam(team));
    }

    fn append_event(&mut self, event: RosterEvent) {
        self.writes.push(StagedWrite::AppendEvent(event));
    }

    async fn commit(self: Box<Self>) -> Result<(), CommitError> {
        let MemoryTx {
            inner,
            guards,
            writes,
        } = *self;
        let mut inner = inner.lock().await;

        for guard in &guards {
            let still_valid = match guard {
                ReadGuard::UserVersion(id, seen) => {
                    inner.users.get(id).map(|u| u.version) == *seen
                }
                ReadGuard::TeamVersion(id, seen) => {
                    inner.teams.get(id).map(|t| t.version) == *seen
                }
                ReadGuard::CodeOwner(code, seen) => inner.team_id_by_code(code) == *seen,
                ReadGuard::ActiveName(name, seen) => inner.active_team_id_by_name(name) == *seen,
            };
            if !still_valid {
                return Err(CommitError::Conflict);
            }
        }

        for write in writes {
            match write {
                StagedWrite::PutUser(user) => {
                    let version = inner.bump();
                    inner.users.insert(user.id, Versioned { value: user, version });
                }
                StagedWrite::PutTeam(team) => {
                    let version = inner.bump();
                    inner.teams.insert(team.id, Versioned { value: team, version });
                }
                StagedWrite::AppendEvent(event) => inner.events.push(event),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JoinCode;
    use std::collections::BTreeSet;

    fn team(name: &str, code: &str) -> Team {
        Team::new(
            name.to_string(),
            BTreeSet::from(["1".to_string()]),
            10,
            JoinCode {
                code: code.to_string(),
                issued_at: chrono::Utc::now(),
            },
            crate::models::RosterEntry {
                user_id: Uuid::new_v4(),
                display_name: "Leader".to_string(),
                initials: "LDR".to_string(),
                joined_at: chrono::Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn stale_record_read_conflicts_at_commit() {
        let store = MemoryStore::new();
        let t = team("Alpha", "AAAAAA");
        let id = t.id;

        let mut setup = store.begin().await.unwrap();
        setup.put_team(t);
        setup.commit().await.unwrap();

        // Both transactions read the same team version.
        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        let mut t1 = tx1.team(id).await.unwrap().unwrap();
        let t2 = tx2.team(id).await.unwrap().unwrap();

        t1.touch(chrono::Utc::now());
        tx1.put_team(t1);
        tx1.commit().await.unwrap();

        tx2.put_team(t2);
        assert!(matches!(
            tx2.commit().await,
            Err(CommitError::Conflict)
        ));
    }

    #[tokio::test]
    async fn negative_name_lookup_is_guarded() {
        let store = MemoryStore::new();

        // tx observes "alpha" free, then a competing commit takes it.
        let mut tx = store.begin().await.unwrap();
        assert!(tx.active_team_by_name("alpha").await.unwrap().is_none());

        let mut racer = store.begin().await.unwrap();
        racer.put_team(team("Alpha", "AAAAAA"));
        racer.commit().await.unwrap();

        tx.put_team(team("Alpha", "BBBBBB"));
        assert!(matches!(tx.commit().await, Err(CommitError::Conflict)));
    }

    #[tokio::test]
    async fn disjoint_transactions_do_not_conflict() {
        let store = MemoryStore::new();
        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        tx1.put_team(team("Alpha", "AAAAAA"));
        tx2.put_team(team("Beta", "BBBBBB"));
        tx1.commit().await.unwrap();
        tx2.commit().await.unwrap();
        assert_eq!(store.list_teams().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reads_see_staged_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let t = team("Alpha", "CCCCCC");
        let id = t.id;
        tx.put_team(t);
        assert!(tx.team(id).await.unwrap().is_some());
        assert!(tx.code_in_use("cccccc").await.unwrap());
    }
}
