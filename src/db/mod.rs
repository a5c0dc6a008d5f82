//! Non-volatile storage for the device.
//!
//! SQLite holds the last few decision snapshots (written before an
//! emergency shutdown or a clean stop) and the accepted runtime config.

mod models;
mod store;

pub use models::*;
pub use store::*;
