//! Database module for the uptime monitor.
//!
//! Provides the check store seam, its SQLite implementation and the
//! uptime statistics derived from stored probe history.

mod models;
mod store;
mod uptime;

pub use models::*;
pub use store::*;
pub use uptime::*;
