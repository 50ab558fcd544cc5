//! Gateway instrumentation
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! binary installs a recorder.

use std::time::Duration;

use clipper_types::models::ChannelId;

pub fn connection_established(channel_id: &ChannelId) {
    ::metrics::counter!("chat_connections_established_total").increment(1);
    ::metrics::gauge!("chat_connections_current", "channel" => channel_id.to_string()).increment(1.0);
}

pub fn connection_closed(channel_id: &ChannelId) {
    ::metrics::gauge!("chat_connections_current", "channel" => channel_id.to_string()).decrement(1.0);
}

pub fn message(channel_id: &ChannelId, kind: &'static str) {
    ::metrics::counter!("chat_messages_total", "channel" => channel_id.to_string(), "type" => kind)
        .increment(1);
}

/// Time from accepting an inbound frame to finishing its local fan-out.
pub fn message_latency(channel_id: &ChannelId, elapsed: Duration) {
    ::metrics::histogram!("chat_message_latency_seconds", "channel" => channel_id.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn error(channel_id: &ChannelId, kind: &'static str) {
    ::metrics::counter!("chat_errors_total", "channel" => channel_id.to_string(), "kind" => kind)
        .increment(1);
}

pub fn channels_active(count: usize) {
    ::metrics::gauge!("chat_channels_active").set(count as f64);
}

pub fn rate_limit_hit(channel_id: &ChannelId) {
    ::metrics::counter!("chat_rate_limit_hits_total", "channel" => channel_id.to_string())
        .increment(1);
}

pub fn broadcast_duration(channel_id: &ChannelId, elapsed: Duration) {
    ::metrics::histogram!("chat_broadcast_duration_seconds", "channel" => channel_id.to_string())
        .record(elapsed.as_secs_f64());
}
