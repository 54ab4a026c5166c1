//! Fire-and-forget statistics.
//!
//! The core reports what happens through a [`StatsSink`]. Sinks must never
//! block; they are invoked synchronously from inside the run-loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why an inbound record was discarded.
///
/// Authentication failures and replays share one tag on purpose, the
/// sink is the only place they surface at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Failed AEAD verification or was already seen.
    BadAuthOrReplay,
    /// Epoch below the minimum retained or not yet known.
    UnknownEpoch,
    /// Could not be parsed.
    Malformed,
    /// Rejected because a buffer or connection limit was reached.
    ResourceLimit,
}

/// A single statistics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    PacketSent,
    PacketReceived,
    FlightSent,
    Retransmission,
    RecordDropped(DropReason),
    HandshakeCompleted,
    HandshakeFailed,
    CookieIssued,
    CookieRotated,
    ConnectionClosed,
}

/// Receiver of statistics events.
pub trait StatsSink: Send + Sync {
    fn record(&self, stat: Stat);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn record(&self, _stat: Stat) {}
}

/// Atomic counters for every [`Stat`].
#[derive(Debug, Default)]
pub struct CountingStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    flights_sent: AtomicU64,
    retransmissions: AtomicU64,
    dropped_bad_auth_or_replay: AtomicU64,
    dropped_unknown_epoch: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_resource_limit: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_failed: AtomicU64,
    cookies_issued: AtomicU64,
    cookie_rotations: AtomicU64,
    connections_closed: AtomicU64,
}

impl CountingStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, stat: Stat) -> &AtomicU64 {
        match stat {
            Stat::PacketSent => &self.packets_sent,
            Stat::PacketReceived => &self.packets_received,
            Stat::FlightSent => &self.flights_sent,
            Stat::Retransmission => &self.retransmissions,
            Stat::RecordDropped(DropReason::BadAuthOrReplay) => &self.dropped_bad_auth_or_replay,
            Stat::RecordDropped(DropReason::UnknownEpoch) => &self.dropped_unknown_epoch,
            Stat::RecordDropped(DropReason::Malformed) => &self.dropped_malformed,
            Stat::RecordDropped(DropReason::ResourceLimit) => &self.dropped_resource_limit,
            Stat::HandshakeCompleted => &self.handshakes_completed,
            Stat::HandshakeFailed => &self.handshakes_failed,
            Stat::CookieIssued => &self.cookies_issued,
            Stat::CookieRotated => &self.cookie_rotations,
            Stat::ConnectionClosed => &self.connections_closed,
        }
    }

    /// Current value of the counter for `stat`.
    pub fn get(&self, stat: Stat) -> u64 {
        self.counter(stat).load(Ordering::Relaxed)
    }

    /// Sum of all dropped records regardless of reason.
    pub fn dropped_total(&self) -> u64 {
        [
            DropReason::BadAuthOrReplay,
            DropReason::UnknownEpoch,
            DropReason::Malformed,
            DropReason::ResourceLimit,
        ]
        .into_iter()
        .map(|r| self.get(Stat::RecordDropped(r)))
        .sum()
    }
}

impl StatsSink for CountingStats {
    fn record(&self, stat: Stat) {
        self.counter(stat).fetch_add(1, Ordering::Relaxed);
    }
}
