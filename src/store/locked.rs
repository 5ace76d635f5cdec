//! Serialized backend for stores without native transactions.
//!
//! The convention: one exclusive async lock makes the holder the single
//! writer, and a write-protection flag on the underlying store refuses
//! any write that arrives outside a held critical section. The flag is
//! suspended on entry and restored by an RAII guard, so an erroring or
//! panicking critical section can never leave protection down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{RosterEvent, Team, TeamState, User};
use crate::store::{CommitError, StoreTx, TeamStore};
use crate::validation::normalize_team_name;

#[derive(Debug, Clone)]
pub enum BatchWrite {
    PutUser(User),
    PutTeam(Team),
    AppendEvent(RosterEvent),
}

/// A store that can only do plain reads and all-or-nothing batch writes,
/// with a write-protection convention instead of transactions.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Toggle the protection convention. Synchronous on purpose so the
    /// restore side can run in `Drop`.
    fn set_write_protect(&self, protected: bool);

    fn is_write_protected(&self) -> bool;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError>;

    async fn find_team_by_code(&self, code: &str) -> Result<Option<Team>, AppError>;

    async fn find_active_team_by_name(&self, normalized: &str)
    -> Result<Option<Team>, AppError>;

    async fn list_teams(&self) -> Result<Vec<Team>, AppError>;

    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    async fn events_for_team(&self, team_id: Uuid) -> Result<Vec<RosterEvent>, AppError>;

    /// Applies every write or none. Must refuse while protection is up.
    async fn apply_batch(&self, writes: Vec<BatchWrite>) -> Result<(), AppError>;
}

/// Scoped suspension of the write-protection convention. Restoration
/// happens in `Drop`, covering early returns, errors and panics alike.
struct ConstraintBypass {
    store: Arc<dyn BatchStore>,
}

impl ConstraintBypass {
    fn engage(store: Arc<dyn BatchStore>) -> Self {
        store.set_write_protect(false);
        ConstraintBypass { store }
    }
}

impl Drop for ConstraintBypass {
    fn drop(&mut self) {
        self.store.set_write_protect(true);
    }
}

/// [`TeamStore`] over a [`BatchStore`]: every transaction takes the
/// global writer lock, so commits never conflict; they only fail if the
/// underlying store does.
#[derive(Clone)]
pub struct LockSerializedStore {
    store: Arc<dyn BatchStore>,
    write_lock: Arc<Mutex<()>>,
}

impl LockSerializedStore {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        LockSerializedStore {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl TeamStore for LockSerializedStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let bypass = ConstraintBypass::engage(self.store.clone());
        Ok(Box::new(LockedTx {
            store: self.store.clone(),
            writes: Vec::new(),
            _bypass: bypass,
            _guard: guard,
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.store.get_user(id).await
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError> {
        self.store.get_team(id).await
    }

    async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        self.store.list_teams().await
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.store.list_users().await
    }

    async fn events_for_team(&self, team_id: Uuid) -> Result<Vec<RosterEvent>, AppError> {
        self.store.events_for_team(team_id).await
    }
}

struct LockedTx {
    store: Arc<dyn BatchStore>,
    writes: Vec<BatchWrite>,
    _bypass: ConstraintBypass,
    _guard: OwnedMutexGuard<()>,
}

impl LockedTx {
    fn staged_user(&self, id: Uuid) -> Option<User> {
        self.writes.iter().rev().find_map(|w| match w {
            BatchWrite::PutUser(u) if u.id == id => Some(u.clone()),
            _ => None,
        })
    }

    fn staged_team(&self, id: Uuid) -> Option<Team> {
        self.writes.iter().rev().find_map(|w| match w {
            BatchWrite::PutTeam(t) if t.id == id => Some(t.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl StoreTx for LockedTx {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, AppError> {
        if let Some(user) = self.staged_user(id) {
            return Ok(Some(user));
        }
        self.store.get_user(id).await
    }

    async fn team(&mut self, id: Uuid) -> Result<Option<Team>, AppError> {
        if let Some(team) = self.staged_team(id) {
            return Ok(Some(team));
        }
        self.store.get_team(id).await
    }

    async fn team_by_code(&mut self, code: &str) -> Result<Option<Team>, AppError> {
        for w in self.writes.iter().rev() {
            if let BatchWrite::PutTeam(t) = w {
                if t.join_code.code.eq_ignore_ascii_case(code) {
                    return Ok(Some(t.clone()));
                }
            }
        }
        self.store.find_team_by_code(code).await
    }

    async fn active_team_by_name(&mut self, normalized: &str) -> Result<Option<Team>, AppError> {
        self.store.find_active_team_by_name(normalized).await
    }

    async fn code_in_use(&mut self, code: &str) -> Result<bool, AppError> {
        Ok(self.team_by_code(code).await?.is_some())
    }

    fn put_user(&mut self, user: User) {
        self.writes.push(BatchWrite::PutUser(user));
    }

    fn put_team(&mut self, team: Team) {
        self.writes.push(BatchWrite::PutTeam(team));
    }

    fn append_event(&mut self, event: RosterEvent) {
        self.writes.push(BatchWrite::AppendEvent(event));
    }

    async fn commit(self: Box<Self>) -> Result<(), CommitError> {
        // Exclusive writer, so no conflict arm; bypass and lock release
        // when self drops at the end of this call.
        self.store
            .apply_batch(self.writes.clone())
            .await
            .map_err(CommitError::Store)
    }
}

/// Reference [`BatchStore`]: plain maps plus the protection flag. Writes
/// that arrive while protection is up are refused, which is what makes
/// convention violations visible in tests.
pub struct InMemoryBatchStore {
    users: RwLock<HashMap<Uuid, User>>,
    teams: RwLock<HashMap<Uuid, Team>>,
    events: RwLock<Vec<RosterEvent>>,
    write_protect: AtomicBool,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        InMemoryBatchStore {
            users: RwLock::new(HashMap::new()),
            teams: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            write_protect: AtomicBool::new(true),
        }
    }
}

impl Default for InMemoryBatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    fn set_write_protect(&self, protected: bool) {
        self.write_protect.store(protected, Ordering::SeqCst);
    }

    fn is_write_protected(&self) -> bool {
        self.write_protect.load(Ordering::SeqCst)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().unwrap().get(&id).cloned())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError> {
        Ok(self.teams.read().unwrap().get(&id).cloned())
    }

    async fn find_team_by_code(&self, code: &str) -> Result<Option<Team>, AppError> {
        Ok(self
            .teams
            .read()
            .unwrap()
            .values()
            .find(|t| t.join_code.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_active_team_by_name(
        &self,
        normalized: &str,
    ) -> Result<Option<Team>, AppError> {
        Ok(self
            .teams
            .read()
            .unwrap()
            .values()
            .find(|t| t.state == TeamState::Active && normalize_team_name(&t.name) == normalized)
            .cloned())
    }

    async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        Ok(self.teams.read().unwrap().values().cloned().collect())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.users.read().unwrap().values().cloned().collect())
    }

    async fn events_for_team(&self, team_id: Uuid) -> Result<Vec<RosterEvent>, AppError> {
        Ok(self
            .events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn apply_batch(&self, writes: Vec<BatchWrite>) -> Result<(), AppError> {
        if self.is_write_protected() {
            return Err(AppError::internal_message(
                "batch write refused: write protection is up",
            ));
        }
        let mut users = self.users.write().unwrap();
        let mut teams = self.teams.write().unwrap();
        let mut events = self.events.write().unwrap();
        for write in writes {
            match write {
                BatchWrite::PutUser(user) => {
                    users.insert(user.id, user);
                }
                BatchWrite::PutTeam(team) => {
                    teams.insert(team.id, team);
                }
                BatchWrite::AppendEvent(event) => events.push(event),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JoinCode, RosterEntry};
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
            RosterEntry {
                user_id: Uuid::new_v4(),
                display_name: "Leader".to_string(),
                initials: "LDR".to_string(),
                joined_at: chrono::Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn protection_is_restored_after_commit() {
        let batch = Arc::new(InMemoryBatchStore::new());
        let store = LockSerializedStore::new(batch.clone());

        let mut tx = store.begin().await.unwrap();
        assert!(!batch.is_write_protected());
        tx.put_team(team("Alpha", "AAAAAA"));
        tx.commit().await.unwrap();

        assert!(batch.is_write_protected());
        assert_eq!(store.list_teams().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn protection_is_restored_when_a_transaction_is_abandoned() {
        let batch = Arc::new(InMemoryBatchStore::new());
        let store = LockSerializedStore::new(batch.clone());

        {
            let mut tx = store.begin().await.unwrap();
            assert!(!batch.is_write_protected());
            tx.put_team(team("Alpha", "AAAAAA"));
            // Dropped without commit, e.g. a precondition failure.
        }

        assert!(batch.is_write_protected());
        assert!(store.list_teams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_outside_the_critical_section_are_refused() {
        let batch = InMemoryBatchStore::new();
        let result = batch
            .apply_batch(vec![BatchWrite::PutTeam(team("Alpha", "AAAAAA"))])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn writers_serialize_through_the_lock() {
        let batch = Arc::new(InMemoryBatchStore::new());
        let store = LockSerializedStore::new(batch);

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.put_team(team(&format!("Team {}", i), &format!("AAAAA{}", i)));
                tx.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list_teams().await.unwrap().len(), 4);
    }
}
