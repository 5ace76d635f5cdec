//! Change-detection API for client delta sync.
//!
//! Clients hold the `version` from their last snapshot and poll with it;
//! the answer is the minimal set of change records needed to catch up,
//! or a full snapshot when the caller has no usable version (first sync,
//! or a version older than the retained log).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{TeamChangeFlag, TeamChanges, TeamSnapshot};
use crate::services::index::IndexService;

#[derive(Debug, Clone, Copy)]
pub enum SinceToken {
    /// Last metadata version the client applied.
    Version(u64),
    /// Fallback for clients that only kept a wall-clock watermark.
    Timestamp(DateTime<Utc>),
    /// First sync; the client has nothing.
    Initial,
}

#[derive(Clone)]
pub struct ChangeQueryService {
    index: Arc<IndexService>,
}

impl ChangeQueryService {
    pub fn new(index: Arc<IndexService>) -> Self {
        ChangeQueryService { index }
    }

    pub async fn get_changes_since(
        &self,
        team_id: Uuid,
        since: SinceToken,
    ) -> Result<TeamChanges, AppError> {
        let snapshot_of = |index: Arc<IndexService>| async move {
            let summary = index.team_summary(team_id).await?;
            let roster = index.roster_for_team(team_id).await?;
            Ok::<TeamSnapshot, AppError>(TeamSnapshot { summary, roster })
        };

        let Some((metadata, log)) = self.index.meta_snapshot(team_id).await else {
            // No metadata row yet (cold start or cleared cache); the
            // authoritative record is still the source of truth.
            let snapshot = snapshot_of(self.index.clone()).await?;
            return Ok(TeamChanges {
                team_id,
                changed: true,
                current_version: snapshot.summary.version,
                categories: BTreeSet::new(),
                deltas: Vec::new(),
                full_resync: !matches!(since, SinceToken::Initial),
                snapshot: Some(snapshot),
            });
        };

        match since {
            SinceToken::Initial => {
                let snapshot = snapshot_of(self.index.clone()).await?;
                Ok(TeamChanges {
                    team_id,
                    changed: true,
                    current_version: metadata.version,
                    categories: BTreeSet::new(),
                    deltas: Vec::new(),
                    full_resync: false,
                    snapshot: Some(snapshot),
                })
            }
            SinceToken::Version(seen) => {
                if seen >= metadata.version {
                    return Ok(TeamChanges {
                        team_id,
                        changed: false,
                        current_version: metadata.version,
                        categories: BTreeSet::new(),
                        deltas: Vec::new(),
                        full_resync: false,
                        snapshot: None,
                    });
                }
                // The log is contiguous; it covers the caller iff the
                // oldest retained record is no newer than seen + 1.
                let covered = log
                    .first()
                    .map(|r| r.version <= seen + 1)
                    .unwrap_or(false);
                if !covered {
                    let snapshot = snapshot_of(self.index.clone()).await?;
                    return Ok(TeamChanges {
                        team_id,
                        changed: true,
                        current_version: metadata.version,
                        categories: BTreeSet::new(),
                        deltas: Vec::new(),
                        full_resync: true,
                        snapshot: Some(snapshot),
                    });
                }
                let deltas: Vec<_> =
                    log.into_iter().filter(|r| r.version > seen).collect();
                let categories = deltas.iter().map(|r| r.category).collect();
                Ok(TeamChanges {
                    team_id,
                    changed: true,
                    current_version: metadata.version,
                    categories,
                    deltas,
                    full_resync: false,
                    snapshot: None,
                })
            }
            SinceToken::Timestamp(watermark) => {
                // Covered iff the retained log reaches back to the
                // watermark (some record at or before it, or the log is
                // complete from version 1).
                let complete = log.first().map(|r| r.version == 1).unwrap_or(false);
                let covered =
                    complete || log.iter().any(|r| r.at <= watermark);
                let deltas: Vec<_> = log
                    .into_iter()
                    .filter(|r| r.at > watermark)
                    .collect();
                if !covered {
                    let snapshot = snapshot_of(self.index.clone()).await?;
                    return Ok(TeamChanges {
                        team_id,
                        changed: true,
                        current_version: metadata.version,
                        categories: BTreeSet::new(),
                        deltas: Vec::new(),
                        full_resync: true,
                        snapshot: Some(snapshot),
                    });
                }
                let changed = !deltas.is_empty();
                let categories = deltas.iter().map(|r| r.category).collect();
                Ok(TeamChanges {
                    team_id,
                    changed,
                    current_version: metadata.version,
                    categories,
                    deltas,
                    full_resync: false,
                    snapshot: None,
                })
            }
        }
    }

    /// One flag per team, one call: clients polling a handful of teams
    /// should not pay a round trip each.
    pub async fn batch_get_changes(
        &self,
        queries: &[(Uuid, SinceToken)],
    ) -> Result<Vec<TeamChangeFlag>, AppError> {
        let lookups = queries.iter().map(|(team_id, since)| {
            let team_id = *team_id;
            let since = *since;
            async move {
                let metadata = self.index.metadata(team_id).await;
                let current_version = metadata.as_ref().map(|m| m.version).unwrap_or(0);
                let changed = match (since, metadata) {
                    (_, None) => true,
                    (SinceToken::Initial, Some(_)) => true,
                    (SinceToken::Version(seen), Some(m)) => seen < m.version,
                    (SinceToken::Timestamp(watermark), Some(m)) => m.last_active > watermark,
                };
                TeamChangeFlag {
                    team_id,
                    changed,
                    current_version,
                }
            }
        });
        Ok(join_all(lookups).await)
    }
}
