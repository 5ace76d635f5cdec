use std::sync::Arc;

use fake::Fake;
use fake::faker::internet::en::Username;
use tokio::sync::Mutex;
use uuid::Uuid;

use rosterlink::models::{ProfileInput, RosterEvent, RosterEventType};
use rosterlink::services::AvailabilityHooks;
use rosterlink::store::TeamStore;
use rosterlink::{AppState, Config, MemoryStore};

pub fn setup_test_env() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Availability-hook double that records every call.
#[derive(Default)]
pub struct RecordingAvailability {
    pub cleared: Mutex<Vec<(Uuid, Uuid)>>,
    pub changes: Mutex<Vec<(Uuid, RosterEventType)>>,
}

#[async_trait::async_trait]
impl AvailabilityHooks for RecordingAvailability {
    async fn clear_member_cells(&self, team_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        self.cleared.lock().await.push((team_id, user_id));
        Ok(())
    }

    async fn record_change(&self, team_id: Uuid, event: &RosterEvent) -> anyhow::Result<()> {
        self.changes.lock().await.push((team_id, event.event_type));
        Ok(())
    }
}

pub struct TestContext {
    pub state: AppState,
    pub hooks: Arc<RecordingAvailability>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn TeamStore>, config: Config) -> Self {
        let hooks = Arc::new(RecordingAvailability::default());
        TestContext {
            state: AppState::new(store, hooks.clone(), config),
            hooks,
        }
    }

    /// Register a profile and return its id.
    pub async fn user(&self, display_name: &str, initials: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .roster
            .upsert_profile(
                id,
                ProfileInput {
                    display_name: Some(display_name.to_string()),
                    initials: Some(initials.to_string()),
                    discord_handle: Some(Username().fake::<String>()),
                },
            )
            .await
            .unwrap();
        id
    }
}
