//! regmirror: a hostname-rewriting mirror for container registries.
//!
//! Requests are routed to an upstream registry host, filtered by path,
//! user-agent, client IP and region, and forwarded with the mirror's own
//! hostname swapped for the upstream's. Responses come back with the
//! substitution reversed in headers and textual bodies; blobs stream through.
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub(crate) mod adapters;
pub(crate) mod utils;

pub use crate::adapters::{HyperHttpClient, HyperServer, MirrorHandler};
pub use crate::core::ProxyService;
pub use crate::utils::config_watcher::{ConfigWatcher, compile_generation};
