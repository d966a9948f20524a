// Declare modules at the root level
pub mod alarm_engine;
pub mod cleaning_scheduler;
pub mod controller;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod id_generator;
pub mod live_status;
pub mod memory;
pub mod notify;
pub mod offline_detector;
pub mod ports;
pub mod thresholds;
pub mod time;
pub mod validators;

// Test utilities module (available in test and integration test builds)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export everything under a shared namespace for external access
pub mod shared {
    pub use super::alarm_engine;
    pub use super::cleaning_scheduler;
    pub use super::controller;
    pub use super::cursor;
    pub use super::domain;
    pub use super::error;
    pub use super::id_generator;
    pub use super::live_status;
    pub use super::memory;
    pub use super::notify;
    pub use super::offline_detector;
    pub use super::ports;
    pub use super::thresholds;
    pub use super::time;
    pub use super::validators;
}

// Also re-export at root for convenience
pub use alarm_engine::*;
pub use cleaning_scheduler::*;
pub use controller::*;
pub use cursor::*;
pub use domain::*;
pub use error::*;
pub use id_generator::*;
pub use live_status::*;
pub use memory::*;
pub use notify::*;
pub use offline_detector::*;
pub use ports::*;
pub use thresholds::*;
pub use time::*;
pub use validators::*;
