pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod validation;

use std::sync::Arc;

pub use config::Config;
pub use error::AppError;
pub use services::{
    AvailabilityHooks, ChangeQueryService, IndexService, NoopAvailability, RosterService,
    SinceToken,
};
pub use store::{MemoryStore, TeamStore};

/// Wired-up core services over one store. Transport layers hold one of
/// these and translate requests into the service calls.
pub struct AppState {
    pub store: Arc<dyn TeamStore>,
    pub index: Arc<IndexService>,
    pub roster: Arc<RosterService>,
    pub changes: ChangeQueryService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TeamStore>,
        availability: Arc<dyn AvailabilityHooks>,
        config: Config,
    ) -> Self {
        let index = Arc::new(IndexService::new(store.clone(), &config));
        let roster = Arc::new(RosterService::new(
            store.clone(),
            index.clone(),
            availability,
            config,
        ));
        let changes = ChangeQueryService::new(index.clone());
        AppState {
            store,
            index,
            roster,
            changes,
        }
    }
}
