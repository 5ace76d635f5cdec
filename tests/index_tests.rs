use pretty_assertions::assert_eq;

use rosterlink::models::{CreateTeamInput, TeamRole, TeamSettingsInput};

mod common;

fn create_input(name: &str) -> CreateTeamInput {
    CreateTeamInput {
        name: name.to_string(),
        divisions: vec!["1".to_string()],
        max_players: None,
    }
}

#[tokio::test]
async fn rebuild_matches_incrementally_maintained_index() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;
    let c = ctx.user("Cara", "CRA").await;

    let t1 = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let t2 = ctx.state.roster.create_team(create_input("Beta"), b).await.unwrap();
    ctx.state.roster.join_by_code(&t1.join_code, b).await.unwrap();
    ctx.state.roster.join_by_code(&t2.join_code, c).await.unwrap();
    ctx.state.roster.transfer_leadership(t1.team_id, b, a).await.unwrap();
    ctx.state.roster.kick(t2.team_id, c, b).await.unwrap();

    let incremental = ctx.state.index.all_entries().await;
    ctx.state.index.rebuild().await.unwrap();
    let rebuilt = ctx.state.index.all_entries().await;
    assert_eq!(incremental, rebuilt);

    // Rebuilding again changes nothing.
    ctx.state.index.rebuild().await.unwrap();
    assert_eq!(ctx.state.index.all_entries().await, rebuilt);
}

#[tokio::test]
async fn cleared_index_falls_back_to_authoritative_records() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();

    // Derived data may be dropped at any time without data loss.
    ctx.state.index.clear().await;
    let roster = ctx.state.roster.get_team_roster(created.team_id).await.unwrap();
    assert_eq!(roster.len(), 2);
    let leader = roster.iter().find(|e| e.user_id == a).unwrap();
    assert_eq!(leader.role, TeamRole::Leader);

    ctx.state.index.clear().await;
    let teams = ctx.state.index.teams_for_user(b).await.unwrap();
    assert_eq!(teams, vec![created.team_id]);
}

#[tokio::test]
async fn roster_reads_track_membership_changes() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();
    assert_eq!(ctx.state.roster.get_team_roster(created.team_id).await.unwrap().len(), 2);

    ctx.state.roster.kick(created.team_id, b, a).await.unwrap();
    let roster = ctx.state.roster.get_team_roster(created.team_id).await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].user_id, a);

    ctx.state.roster.leave(created.team_id, a).await.unwrap();
    assert!(ctx.state.roster.get_team_roster(created.team_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_versions_increase_monotonically() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;
    let b = ctx.user("Bob", "BOB").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let v1 = ctx.state.index.metadata(created.team_id).await.unwrap().version;

    ctx.state.roster.join_by_code(&created.join_code, b).await.unwrap();
    let v2 = ctx.state.index.metadata(created.team_id).await.unwrap().version;
    assert!(v2 > v1);

    ctx.state
        .roster
        .update_settings(
            created.team_id,
            TeamSettingsInput {
                name: Some("Alpha Prime".to_string()),
                ..Default::default()
            },
            a,
        )
        .await
        .unwrap();
    let meta = ctx.state.index.metadata(created.team_id).await.unwrap();
    assert!(meta.version > v2);
    assert_eq!(meta.last_changed_by, Some(a));
}

#[tokio::test]
async fn summary_cache_is_invalidated_by_settings_changes() {
    common::setup_test_env();
    let ctx = common::TestContext::new();
    let a = ctx.user("Alice", "ALC").await;

    let created = ctx.state.roster.create_team(create_input("Alpha"), a).await.unwrap();
    let before = ctx.state.index.team_summary(created.team_id).await.unwrap();
    assert_eq!(before.name, "Alpha");
    assert_eq!(before.member_count, 1);

    ctx.state
        .roster
        .update_settings(
            created.team_id,
            TeamSettingsInput {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
            a,
        )
        .await
        .unwrap();

    let after = ctx.state.index.team_summary(created.team_id).await.unwrap();
    assert_eq!(after.name, "Renamed");
    assert!(after.version > before.version);
}
