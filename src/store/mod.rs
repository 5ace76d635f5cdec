//! Abstract transactional store for User/Team records and the roster
//! event log.
//!
//! Every roster-mutating operation runs as: begin a transaction, re-check
//! its preconditions on freshly read data, stage writes, commit. A commit
//! fails with [`CommitError::Conflict`] when any record (or negative
//! lookup) read during the transaction changed underneath it; the
//! [`TxRunner`] retries the whole closure on a fresh transaction.
//!
//! Two backends: [`memory::MemoryStore`] (optimistic, versioned reads)
//! and [`locked::LockSerializedStore`] (single-writer critical section
//! for stores without native transactions).

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{RosterEvent, Team, User};

pub mod locked;
pub mod memory;

pub use locked::{BatchStore, BatchWrite, InMemoryBatchStore, LockSerializedStore};
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("transaction conflict")]
    Conflict,

    #[error(transparent)]
    Store(#[from] AppError),
}

/// One open transaction. Reads are guarded: whatever is read (including
/// a miss on a code or name lookup) is re-verified at commit time.
/// Writes are staged and applied atomically on commit; reads observe
/// the transaction's own staged writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn team(&mut self, id: Uuid) -> Result<Option<Team>, AppError>;

    /// Case-insensitive lookup by the currently stored join code.
    async fn team_by_code(&mut self, code: &str) -> Result<Option<Team>, AppError>;

    /// Lookup by normalized name among teams in the `active` state.
    async fn active_team_by_name(&mut self, normalized: &str) -> Result<Option<Team>, AppError>;

    /// Whether any team, in any state, currently holds this code.
    async fn code_in_use(&mut self, code: &str) -> Result<bool, AppError>;

    fn put_user(&mut self, user: User);

    fn put_team(&mut self, team: Team);

    fn append_event(&mut self, event: RosterEvent);

    async fn commit(self: Box<Self>) -> Result<(), CommitError>;
}

/// Store handle shared by the lifecycle engine, the index layer and
/// tests. The untransacted reads serve index rebuilds, fallback scans
/// and history queries; they carry no guards.
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError>;

    async fn list_teams(&self) -> Result<Vec<Team>, AppError>;

    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    async fn events_for_team(&self, team_id: Uuid) -> Result<Vec<RosterEvent>, AppError>;
}

pub type TxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

#[derive(Debug)]
pub struct TxRunner;

impl TxRunner {
    /// Run a closure inside a transaction, retrying on commit conflicts.
    ///
    /// Closure errors are business outcomes and are returned as-is; only
    /// commit-time conflicts retry. Exhausting the attempt budget is an
    /// internal error, per the contract that the store absorbs conflicts.
    pub async fn run<T, F>(store: &dyn TeamStore, max_attempts: u32, f: F) -> Result<T, AppError>
    where
        F: for<'a> Fn(&'a mut (dyn StoreTx + 'static)) -> TxFuture<'a, T>,
        T: Send,
    {
        for attempt in 1..=max_attempts {
            let mut tx = store.begin().await?;
            let value = f(tx.as_mut()).await?;
            match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(CommitError::Conflict) => {
                    log::warn!(
                        "transaction conflict on attempt {}/{}, retrying",
                        attempt,
                        max_attempts
                    );
                    continue;
                }
                Err(CommitError::Store(err)) => return Err(err),
            }
        }
        Err(AppError::internal_message("transaction retries exhausted"))
    }
}
