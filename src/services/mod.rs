pub mod availability;
pub mod changes;
pub mod index;
pub mod roster;

pub use availability::{AvailabilityHooks, NoopAvailability};
pub use changes::{ChangeQueryService, SinceToken};
pub use index::IndexService;
pub use roster::RosterService;
