//! Process-wide counters (C7 supporting data) and the JSON snapshot shape
//! served by the admin interface (§6). The teacher has no metrics module to
//! ground this on; the `AtomicU64`-bundle shape is the standard lock-free
//! counter idiom, with the field set taken from spec.md §6 directly.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Every `DROP_LOG_SAMPLE_RATE`-th drop in a category is logged; the rest
/// only move the counter. Matches §7's "counters + warn log at a sampled
/// rate" without flooding the log at full request rate under sustained
/// rejection (a starved rate limiter can otherwise mean one warn per frame).
pub const DROP_LOG_SAMPLE_RATE: u64 = 200;

/// Whether the drop that just brought a counter to `count` (the
/// post-increment value, so the first drop passes `count == 1`) should be
/// logged, given [`DROP_LOG_SAMPLE_RATE`].
pub fn should_log_sample(count: u64) -> bool {
    (count - 1) % DROP_LOG_SAMPLE_RATE == 0
}

/// Process-wide atomic counters. Every field is independently incrementable
/// from any task without locking; the JSON snapshot is assembled by loading
/// each counter individually, so it is not a single atomic point-in-time
/// view, matching how the teacher's metrics module documents its own
/// snapshot.
#[derive(Default)]
pub struct GatewayStats {
    connections_total: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_oversize: AtomicU64,
    dropped_auth: AtomicU64,
    dropped_rate: AtomicU64,
    dropped_route: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    start_time_ms: u64,
}

impl GatewayStats {
    /// Creates a zeroed counter bundle. `start_time_ms` anchors
    /// `uptime_sec` in the snapshot and must be supplied by the caller since
    /// this crate never reads the wall clock directly (see [`crate::system_env`]).
    pub fn new(start_time_ms: u64) -> Self {
        Self { start_time_ms, ..Default::default() }
    }

    /// Records one newly accepted connection.
    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one decoded inbound frame of `bytes` wire size.
    pub fn record_frame_in(&self, bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records one outbound frame of `bytes` wire size.
    pub fn record_frame_out(&self, bytes: usize) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a frame dropped for malformed encoding (decode error).
    /// Returns the post-increment count, for the caller's log sampler.
    pub fn record_dropped_malformed(&self) -> u64 {
        self.dropped_malformed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a frame dropped for exceeding the body size cap. Returns the
    /// post-increment count, for the caller's log sampler.
    pub fn record_dropped_oversize(&self) -> u64 {
        self.dropped_oversize.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a frame dropped at the auth gate (P8). Returns the
    /// post-increment count, for the caller's log sampler.
    pub fn record_dropped_auth(&self) -> u64 {
        self.dropped_auth.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a frame dropped at the rate gate, at any scope. Returns the
    /// post-increment count, for the caller's log sampler.
    pub fn record_dropped_rate(&self) -> u64 {
        self.dropped_rate.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a frame dropped for lack of a healthy route. Returns the
    /// post-increment count, for the caller's log sampler.
    pub fn record_dropped_route(&self) -> u64 {
        self.dropped_route.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Assembles the §6 JSON snapshot shape. `active_connections` and
    /// `authenticated`/`buckets_ip`/`buckets_identity` are pulled from their
    /// owning registries rather than duplicated into this struct, since
    /// those are already the source of truth for "currently live" counts.
    #[allow(clippy::too_many_arguments)]
    pub fn snapshot(
        &self,
        active_connections: usize,
        authenticated: usize,
        buckets_ip: usize,
        buckets_identity: usize,
        now_ms: u64,
    ) -> StatsSnapshot {
        StatsSnapshot {
            connections: ConnectionsSnapshot {
                active: active_connections,
                total: self.connections_total.load(Ordering::Relaxed),
            },
            frames: FramesSnapshot {
                r#in: self.frames_in.load(Ordering::Relaxed),
                out: self.frames_out.load(Ordering::Relaxed),
                dropped: DroppedSnapshot {
                    malformed: self.dropped_malformed.load(Ordering::Relaxed),
                    oversize: self.dropped_oversize.load(Ordering::Relaxed),
                    auth: self.dropped_auth.load(Ordering::Relaxed),
                    rate: self.dropped_rate.load(Ordering::Relaxed),
                    route: self.dropped_route.load(Ordering::Relaxed),
                },
            },
            bytes: BytesSnapshot {
                r#in: self.bytes_in.load(Ordering::Relaxed),
                out: self.bytes_out.load(Ordering::Relaxed),
            },
            auth: AuthSnapshot { authenticated },
            rate: RateSnapshot { buckets_ip, buckets_identity, rejected: self.dropped_rate.load(Ordering::Relaxed) },
            uptime_sec: now_ms.saturating_sub(self.start_time_ms) / 1000,
        }
    }
}

/// Top-level metrics snapshot, serialized exactly as §6 specifies.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: ConnectionsSnapshot,
    pub frames: FramesSnapshot,
    pub bytes: BytesSnapshot,
    pub auth: AuthSnapshot,
    pub rate: RateSnapshot,
    pub uptime_sec: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionsSnapshot {
    pub active: usize,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FramesSnapshot {
    pub r#in: u64,
    pub out: u64,
    pub dropped: DroppedSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DroppedSnapshot {
    pub malformed: u64,
    pub oversize: u64,
    pub auth: u64,
    pub rate: u64,
    pub route: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BytesSnapshot {
    pub r#in: u64,
    pub out: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub authenticated: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateSnapshot {
    pub buckets_ip: usize,
    pub buckets_identity: usize,
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let stats = GatewayStats::new(1_000);
        stats.record_connection();
        stats.record_connection();
        stats.record_frame_in(29);
        stats.record_frame_out(40);
        stats.record_dropped_auth();
        stats.record_dropped_rate();

        let snapshot = stats.snapshot(1, 1, 2, 3, 11_000);

        assert_eq!(snapshot.connections, ConnectionsSnapshot { active: 1, total: 2 });
        assert_eq!(snapshot.frames.r#in, 1);
        assert_eq!(snapshot.frames.out, 1);
        assert_eq!(snapshot.frames.dropped.auth, 1);
        assert_eq!(snapshot.bytes.r#in, 29);
        assert_eq!(snapshot.bytes.out, 40);
        assert_eq!(snapshot.rate.rejected, 1);
        assert_eq!(snapshot.uptime_sec, 10);
    }

    #[test]
    fn snapshot_serializes_to_the_documented_field_names() {
        let stats = GatewayStats::new(0);
        let snapshot = stats.snapshot(0, 0, 0, 0, 0);
        let json = serde_json::to_value(&snapshot).expect("serializes");
        assert!(json.get("connections").is_some());
        assert!(json["frames"].get("dropped").is_some());
        assert!(json["frames"]["dropped"].get("malformed").is_some());
        assert!(json["rate"].get("buckets_ip").is_some());
    }
}
