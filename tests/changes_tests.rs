use chrono::Utc;

use rosterlink::models::{ChangeCategory, ChangePayload, CreateTeamInput};
use rosterlink::{Config, SinceToken};

mod common;

fn create_input(name: &str) -> CreateTeamInput {
    CreateTeamInput {
        name: name.to_string(),
        divisions: vec!["1".to_string()],
        max_players: None,
    }
}

#[tokio::test]
async fn version_poll_returns_minimal_roster_deltas() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let seen = ctx.state.index.metadata(created.team_id).await.unwrap().version;

    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Version(seen))
        .await
        .unwrap();
    assert!(changes.changed);
    assert!(!changes.full_resync);
    assert!(changes.snapshot.is_none(), "delta poll must not ship a snapshot");
    assert!(changes.categories.contains(&ChangeCategory::Roster));
    assert!(changes.deltas.iter().any(|d| matches!(
        &d.payload,
        ChangePayload::RosterAdded { entry } if entry.user_id == b
    )));
}

#[tokio::test]
async fn up_to_date_clients_see_no_change() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let seen = ctx.state.index.metadata(created.team_id).await.unwrap().version;

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Version(seen))
        .await
        .unwrap();
    assert!(!changes.changed);
    assert!(changes.deltas.is_empty());
    assert!(changes.snapshot.is_none());
}

#[tokio::test]
async fn first_sync_gets_a_full_snapshot() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Initial)
        .await
        .unwrap();
    let snapshot = changes.snapshot.expect("initial sync ships a snapshot");
    assert_eq!(snapshot.roster.len(), 2);
    assert_eq!(snapshot.summary.member_count, 2);
    assert!(changes.deltas.is_empty());
}

#[tokio::test]
async fn versions_older_than_the_retained_log_force_a_resync() {
    common::setup_test_env();
    let ctx = common::TestContext::with_config(Config {
        change_log_capacity: 2,
        ..Default::default()
    });
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;
    let c = ctx.user("Cara", "CRA").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();
    ctx.state.roster.join_by_code(&created.join_code, c).await.unwrap();
    ctx.state.roster.kick(created.team_id, c, a).await.unwrap();

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Version(1))
        .await
        .unwrap();
    assert!(changes.changed);
    assert!(changes.full_resync);
    assert!(changes.snapshot.is_some());
    assert!(changes.deltas.is_empty());
}

#[tokio::test]
async fn timestamp_watermarks_work_for_clients_without_versions() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let watermark = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Timestamp(watermark))
        .await
        .unwrap();
    assert!(changes.changed);
    assert!(!changes.deltas.is_empty());

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Timestamp(Utc::now()))
        .await
        .unwrap();
    assert!(!changes.changed);
}

#[tokio::test]
async fn availability_touches_surface_with_their_cells() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let seen = ctx.state.index.metadata(created.team_id).await.unwrap().version;

    ctx.state
        .roster
        .record_availability_change(
            created.team_id,
            a,
            vec!["2026-W36:fri-20".to_string(), "2026-W36:sat-20".to_string()],
        )
        .await
        .unwrap();

    let changes = ctx
        .state
        .changes
        .get_changes_since(created.team_id, SinceToken::Version(seen))
        .await
        .unwrap();
    assert!(changes.categories.contains(&ChangeCategory::Availability));
    assert!(changes.deltas.iter().any(|d| matches!(
        &d.payload,
        ChangePayload::AvailabilityTouched { cells } if cells.len() == 2
    )));
}

#[tokio::test]
async fn batch_poll_flags_only_the_changed_teams() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;
    let c = ctx.user("Cara", "CRA").await;

    let t1 = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let t2 = ctx.state.roster.create_team(create_input("Beta"), b).await.unwrap();
    let v1 = ctx.state.index.metadata(t1.team_id).await.unwrap().version;
    let v2 = ctx.state.index.metadata(t2.team_id).await.unwrap().version;

    ctx.state.roster.join_by_code(&t2.join_code, c).await.unwrap();

    let flags = ctx
        .state
        .changes
        .batch_get_changes(&[
            (t1.team_id, SinceToken::Version(v1)),
            (t2.team_id, SinceToken::Version(v2)),
        ])
        .await
        .unwrap();

    assert_eq!(flags.len(), 2);
    assert!(!flags[0].changed);
    assert!(flags[1].changed);
    assert!(flags[1].current_version > v2);
}
