pub mod config;
pub mod db;
pub mod format;
pub mod models;
pub mod tracker;

pub use config::{AppConfig, ConfigStore};
pub use db::Database;
pub use format::{format_sessions, FormatOptions};
pub use models::SleepSession;
pub use tracker::{SessionTrackerController, TrackerSnapshot};
