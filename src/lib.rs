//! agent-config-watcher distributes per-workload sidecar configuration through
//! one ConfigMap per namespace and keeps the workloads in line with it.
//!
//! A [`ConfigWatcher`] follows the agents ConfigMap of each watched namespace,
//! turns every observed change into entry-level deletions and modifications,
//! and reacts by generating configs that are still placeholders or by
//! restarting the affected workload so that it picks up its new config.
//!
//! [`watchable::WatchableMap`] is the general form of the same idea: a
//! concurrent map whose readers subscribe to coalesced, isolated snapshots.

pub mod agent;
pub mod cluster;
pub mod config;
pub use config::Config;
mod error;
pub use error::{Error, Result};
pub mod generator;
pub mod watchable;
mod watcher;
pub use watcher::{ConfigWatcher, Entry};
