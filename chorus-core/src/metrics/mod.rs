//! Metrics for the state core
//!
//! Counters are recorded through the `metrics` facade; installing an exporter
//! is left to the embedding host.

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const BROADCAST_MESSAGES: &str = "chorus.broadcast.messages";
pub const BROADCAST_DELIVERIES: &str = "chorus.broadcast.deliveries";
pub const ACL_CACHE_HITS: &str = "chorus.acl.cache.hits";
pub const ACL_CACHE_MISSES: &str = "chorus.acl.cache.misses";
pub const REPARENT_REJECTED: &str = "chorus.channel.reparent.rejected";
pub const SESSIONS_CONNECTED: &str = "chorus.sessions.connected";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(BROADCAST_MESSAGES, "Number of state deltas handed to the broadcaster");
    describe_counter!(BROADCAST_DELIVERIES, "Number of per-session deliveries of those deltas");
    describe_counter!(ACL_CACHE_HITS, "Permission checks answered from the ACL cache");
    describe_counter!(ACL_CACHE_MISSES, "Permission checks that required evaluation");
    describe_counter!(REPARENT_REJECTED, "Channel moves rejected because they would create a cycle");
    describe_gauge!(SESSIONS_CONNECTED, "Number of connected sessions");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}
