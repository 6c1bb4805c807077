//! Watches Cosmos SDK chains for scheduled software upgrades and alerts Slack
//! as they are scheduled, approach and pass.
//!
//! The binary wires one [`monitor::ChainMonitor`] per configured chain; the
//! modules are exposed so the pieces can be driven and tested on their own.

pub mod chain;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod notifier;
pub mod store;
