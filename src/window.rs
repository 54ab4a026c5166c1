/// Width of the replay bitmap.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

/// Sliding replay window for record sequence numbers.
///
/// Maintains the latest accepted sequence number and a 64-bit bitmap of the
/// last 64 seen sequence numbers to reject duplicates and old records.
///
/// Each epoch has its own `ReplayWindow`. Checking and marking are separate
/// so that a record only moves the window after it authenticated.
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    max_seq: u64,
    window: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seqno` would be accepted. Does not change the window.
    pub fn is_fresh(&self, seqno: u64) -> bool {
        if seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= REPLAY_WINDOW_SIZE {
            return false; // too old
        }
        (self.window & (1u64 << offset)) == 0
    }

    /// Record `seqno` as accepted.
    pub fn mark(&mut self, seqno: u64) {
        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            if delta >= REPLAY_WINDOW_SIZE {
                self.window = 0;
            } else {
                self.window <<= delta;
            }
            self.window |= 1; // mark newest as seen
            self.max_seq = seqno;
        } else {
            let offset = self.max_seq - seqno;
            if offset < REPLAY_WINDOW_SIZE {
                self.window |= 1u64 << offset;
            }
        }
    }

    /// Check if the given sequence number is acceptable and update the window state.
    /// Returns true if fresh/acceptable, false if duplicate/too old.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.is_fresh(seqno) {
            return false;
        }
        self.mark(seqno);
        true
    }

    /// Highest sequence number accepted so far.
    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }
}
