pub mod controller;
pub mod events;
pub mod planner;
pub mod prefetch;
pub mod state;

pub use controller::{MediaStatus, SessionEngine};
pub use events::SessionEvent;
pub use planner::{plan, ViewingPlan};
pub use state::{PlaybackStatus, SessionSnapshot, SessionState};
