pub mod controller;
pub mod state;

pub use controller::SessionTrackerController;
pub use state::TrackerSnapshot;
