pub mod session;

pub use session::{SleepSession, QUALITY_MAX, QUALITY_MIN};
