use std::time::Duration;

/// Retransmission timeout for one flight.
///
/// Starts at `start_rto`, doubles on every retry and never exceeds
/// `max_rto`. After `retries` attempts [`can_retry`](Self::can_retry) is false.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    rto: Duration,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, max_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            max_rto,
            retries,
            rto: start_rto.min(max_rto),
            left: retries,
        }
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto.min(self.max_rto);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempt(&mut self) {
        let (n, overflow) = self.left.overflowing_sub(1);

        if overflow {
            return;
        }

        self.left = n;
        self.rto = self.rto.saturating_mul(2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }

    /// Number of retries performed since the last reset.
    pub fn attempts(&self) -> usize {
        self.retries - self.left
    }
}
